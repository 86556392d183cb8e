//! Device error types.

use crate::transport::Characteristic;
use r10link_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    Write(String),

    #[error("read of {characteristic} failed: {reason}")]
    Read {
        characteristic: Characteristic,
        reason: String,
    },

    #[error("subscription to {0} failed")]
    Subscribe(Characteristic),

    #[error("characteristic {0} not available")]
    Unavailable(Characteristic),
}

/// Device errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("handshake not complete")]
    HandshakeIncomplete,

    #[error("device is shut down")]
    ShutDown,

    #[error("service codec error: {0}")]
    Codec(String),
}

impl DeviceError {
    /// Returns whether the connection must be re-established from scratch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::Transport(_) | DeviceError::HandshakeTimeout(_) | DeviceError::ShutDown
        )
    }
}
