//! Per-connection handshake.
//!
//! The central sends a fixed 12-byte request with header `0x00`. The
//! peripheral answers with a fixed prefix followed by the session header
//! byte at offset 12; every later chunk in both directions carries that
//! header. The central confirms with a single `0x00` body.

use bytes::{BufMut, Bytes, BytesMut};

/// Header byte used before a session header is negotiated.
pub const HANDSHAKE_HEADER: u8 = 0x00;

/// Body of the handshake request.
pub const HANDSHAKE_REQUEST: [u8; 12] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
];

/// Prefix of a handshake reply.
pub const HANDSHAKE_REPLY_PREFIX: [u8; 12] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
];

/// Offset of the session header byte in a handshake reply.
pub const HEADER_OFFSET: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    AwaitingChallenge,
    Complete { header: u8 },
}

/// Handshake state machine. Pure; the caller writes the returned chunks.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::NotStarted,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Begins (or restarts) the handshake and returns the request chunk.
    pub fn start(&mut self) -> Bytes {
        self.state = HandshakeState::AwaitingChallenge;
        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_REQUEST.len());
        buf.put_u8(HANDSHAKE_HEADER);
        buf.put_slice(&HANDSHAKE_REQUEST);
        buf.freeze()
    }

    /// Returns true if an inbound chunk with this header belongs to the
    /// handshake rather than the framed message stream.
    pub fn routes(&self, header: u8) -> bool {
        !self.is_complete() || header == HANDSHAKE_HEADER
    }

    /// Feeds a chunk body (header stripped).
    ///
    /// Returns the confirmation chunk to send when the body is a valid
    /// reply. Any other body leaves the state unchanged. A valid reply is
    /// accepted in every state, so the peripheral may renegotiate.
    pub fn receive(&mut self, body: &[u8]) -> Option<Bytes> {
        if body.len() <= HEADER_OFFSET || !body.starts_with(&HANDSHAKE_REPLY_PREFIX) {
            return None;
        }

        let header = body[HEADER_OFFSET];
        self.state = HandshakeState::Complete { header };
        Some(Bytes::copy_from_slice(&[header, 0x00]))
    }

    /// Returns the negotiated header, if any.
    pub fn header(&self) -> Option<u8> {
        match self.state {
            HandshakeState::Complete { header } => Some(header),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, HandshakeState::Complete { .. })
    }

    /// Invalidates the session.
    pub fn reset(&mut self) {
        self.state = HandshakeState::NotStarted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(header: u8) -> Vec<u8> {
        let mut body = HANDSHAKE_REPLY_PREFIX.to_vec();
        body.push(header);
        body
    }

    #[test]
    fn test_start_sends_request() {
        let mut handshake = Handshake::new();
        let chunk = handshake.start();

        assert_eq!(chunk[0], 0x00);
        assert_eq!(&chunk[1..], &HANDSHAKE_REQUEST);
        assert_eq!(handshake.state(), HandshakeState::AwaitingChallenge);
    }

    #[test]
    fn test_valid_reply_completes() {
        let mut handshake = Handshake::new();
        handshake.start();

        let confirm = handshake.receive(&reply(0x42)).unwrap();
        assert_eq!(confirm.as_ref(), &[0x42, 0x00]);
        assert_eq!(handshake.header(), Some(0x42));
        assert!(handshake.is_complete());
    }

    #[test]
    fn test_reply_without_header_byte_ignored() {
        let mut handshake = Handshake::new();
        handshake.start();

        assert!(handshake.receive(&HANDSHAKE_REPLY_PREFIX).is_none());
        assert_eq!(handshake.state(), HandshakeState::AwaitingChallenge);
    }

    #[test]
    fn test_wrong_prefix_ignored() {
        let mut handshake = Handshake::new();
        handshake.start();

        let mut body = reply(0x42);
        body[0] = 0x02;
        assert!(handshake.receive(&body).is_none());
        assert!(!handshake.is_complete());
        assert!(handshake.header().is_none());
    }

    #[test]
    fn test_routing() {
        let mut handshake = Handshake::new();
        assert!(handshake.routes(0x42));

        handshake.start();
        handshake.receive(&reply(0x42));
        assert!(!handshake.routes(0x42));
        assert!(handshake.routes(0x00));
    }

    #[test]
    fn test_renegotiation_and_reset() {
        let mut handshake = Handshake::new();
        handshake.start();
        handshake.receive(&reply(0x11));
        handshake.receive(&reply(0x22));
        assert_eq!(handshake.header(), Some(0x22));

        handshake.reset();
        assert_eq!(handshake.state(), HandshakeState::NotStarted);
        assert!(handshake.header().is_none());
    }
}
