//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing, reassembling or interpreting messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid COBS block at offset {offset}")]
    CobsDecode { offset: usize },

    #[error("frame decoded to no bytes")]
    EmptyFrame,

    #[error("frame too short: {len} bytes (need at least {min})")]
    FrameTooShort { len: usize, min: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("message too short for class {class}: {len} bytes (need {min})")]
    MessageTooShort {
        class: String,
        len: usize,
        min: usize,
    },

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl ProtocolError {
    /// Returns whether the error is a checksum mismatch, as opposed to a
    /// structural parse failure.
    pub fn is_checksum(&self) -> bool {
        matches!(self, ProtocolError::CrcMismatch { .. })
    }
}
