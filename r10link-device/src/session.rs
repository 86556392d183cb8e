//! Shared handshake session.

use bytes::Bytes;
use parking_lot::Mutex;
use r10link_protocol::handshake::HANDSHAKE_HEADER;
use r10link_protocol::{Handshake, HandshakeState};
use std::time::Duration;
use tokio::sync::watch;

/// Handshake state shared by the reader and the setup sequence.
pub struct Session {
    handshake: Mutex<Handshake>,
    complete: watch::Sender<bool>,
}

impl Session {
    pub fn new() -> Self {
        let (complete, _) = watch::channel(false);
        Self {
            handshake: Mutex::new(Handshake::new()),
            complete,
        }
    }

    /// Restarts the handshake and returns the request chunk to write.
    pub fn start(&self) -> Bytes {
        let chunk = self.handshake.lock().start();
        self.complete.send_replace(false);
        chunk
    }

    /// Returns true if a chunk with this header must go to the handshake.
    pub fn routes(&self, header: u8) -> bool {
        self.handshake.lock().routes(header)
    }

    /// Feeds a handshake chunk body. Returns the confirmation chunk when the
    /// body completes the handshake.
    pub fn receive(&self, body: &[u8]) -> Option<Bytes> {
        let confirm = self.handshake.lock().receive(body)?;
        self.complete.send_replace(true);
        Some(confirm)
    }

    /// Waits until the handshake completes. Returns false on timeout.
    pub async fn wait_complete(&self, timeout: Duration) -> bool {
        let mut rx = self.complete.subscribe();
        let done = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        done
    }

    /// Returns the header for outbound chunks.
    pub fn header(&self) -> u8 {
        self.handshake.lock().header().unwrap_or(HANDSHAKE_HEADER)
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.lock().state()
    }

    pub fn is_complete(&self) -> bool {
        self.handshake.lock().is_complete()
    }

    /// Forgets the negotiated header.
    pub fn invalidate(&self) {
        self.handshake.lock().reset();
        self.complete.send_replace(false);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
