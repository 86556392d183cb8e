//! Frame format and chunk reassembly.
//!
//! Frame layout before stuffing (all little-endian):
//!
//! ```text
//! +--------+----------------------+--------+
//! | length | message              | crc16  |
//! | 2 bytes| length - 4 bytes     | 2 bytes|
//! +--------+----------------------+--------+
//! ```
//!
//! `length` counts itself, the message and the CRC. The CRC covers
//! `length ∥ message`. The whole buffer is COBS-encoded and wrapped in
//! `0x00` delimiters, then split into chunks of at most
//! [`MAX_CHUNK_SIZE`](crate::MAX_CHUNK_SIZE) bytes, each prefixed with the
//! session header byte.

use crate::error::ProtocolError;
use crate::{cobs, crc, DELIMITER};
use bytes::{BufMut, Bytes, BytesMut};

/// Bytes added to a message by the length prefix and CRC suffix.
pub const FRAME_OVERHEAD: usize = 4;

/// Largest message that fits the 16-bit length field.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize - FRAME_OVERHEAD;

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message bytes, starting with the 2-byte class prefix.
    pub message: Bytes,
}

impl Frame {
    /// Creates a frame around the given message bytes.
    pub fn new(message: impl Into<Bytes>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns `length ∥ message ∥ crc16`, before stuffing.
    pub fn to_raw(&self) -> Result<BytesMut, ProtocolError> {
        if self.message.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.message.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let length = (self.message.len() + FRAME_OVERHEAD) as u16;
        let mut buf = BytesMut::with_capacity(length as usize);
        buf.put_u16_le(length);
        buf.put_slice(&self.message);
        let checksum = crc::checksum(&buf);
        buf.put_u16_le(checksum);
        Ok(buf)
    }

    /// Encodes the frame for the wire: stuffed and delimited.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let raw = self.to_raw()?;
        let stuffed = cobs::encode(&raw);

        let mut buf = BytesMut::with_capacity(stuffed.len() + 2);
        buf.put_u8(DELIMITER);
        buf.put_slice(&stuffed);
        buf.put_u8(DELIMITER);
        Ok(buf)
    }

    /// Checks the CRC of a decoded (unstuffed) frame.
    ///
    /// Only structural problems are errors here. A checksum mismatch is
    /// reported through [`CheckedFrame::is_valid`] so the caller decides
    /// whether to keep the frame.
    pub fn check(decoded: &[u8]) -> Result<CheckedFrame, ProtocolError> {
        if decoded.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        if decoded.len() < FRAME_OVERHEAD {
            return Err(ProtocolError::FrameTooShort {
                len: decoded.len(),
                min: FRAME_OVERHEAD,
            });
        }

        let body_end = decoded.len() - 2;
        let declared_len = u16::from_le_bytes([decoded[0], decoded[1]]);
        let expected_crc = u16::from_le_bytes([decoded[body_end], decoded[body_end + 1]]);
        let actual_crc = crc::checksum(&decoded[..body_end]);

        Ok(CheckedFrame {
            frame: Frame::new(Bytes::copy_from_slice(&decoded[2..body_end])),
            declared_len,
            expected_crc,
            actual_crc,
        })
    }
}

/// A decoded frame together with its checksum verdict.
#[derive(Debug, Clone)]
pub struct CheckedFrame {
    pub frame: Frame,
    /// Value of the length prefix, as sent.
    pub declared_len: u16,
    /// CRC carried by the frame.
    pub expected_crc: u16,
    /// CRC computed over the received bytes.
    pub actual_crc: u16,
}

impl CheckedFrame {
    /// Returns true if the carried CRC matches the computed one.
    pub fn is_valid(&self) -> bool {
        self.expected_crc == self.actual_crc
    }

    /// Returns true if the length prefix agrees with the bytes received.
    pub fn length_matches(&self) -> bool {
        self.declared_len as usize == self.frame.message.len() + FRAME_OVERHEAD
    }

    /// Returns the frame, or a `CrcMismatch` error.
    pub fn into_verified(self) -> Result<Frame, ProtocolError> {
        if self.is_valid() {
            Ok(self.frame)
        } else {
            Err(ProtocolError::CrcMismatch {
                expected: self.expected_crc,
                actual: self.actual_crc,
            })
        }
    }
}

/// Splits an encoded frame into chunks of at most `max_chunk` bytes, each
/// prefixed with `header`.
pub fn chunk(encoded: &[u8], header: u8, max_chunk: usize) -> Vec<Bytes> {
    let max_chunk = max_chunk.max(1);
    encoded
        .chunks(max_chunk)
        .map(|piece| {
            let mut buf = BytesMut::with_capacity(piece.len() + 1);
            buf.put_u8(header);
            buf.put_slice(piece);
            buf.freeze()
        })
        .collect()
}

/// Accumulates chunk bodies (header byte already stripped) until a full
/// delimited frame is available.
#[derive(Debug, Default)]
pub struct Reassembler {
    current: BytesMut,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk body.
    ///
    /// Returns `Ok(Some(decoded))` when the chunk closes a frame, `Ok(None)`
    /// while more chunks are needed. A leading `0x00` discards any partial
    /// frame; a trailing `0x00` completes the current one.
    pub fn push(&mut self, body: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut body = body;
        let mut complete = false;

        if let Some((&last, rest)) = body.split_last() {
            if last == DELIMITER {
                complete = true;
                body = rest;
            }
        }
        if let Some((&first, rest)) = body.split_first() {
            if first == DELIMITER {
                self.current.clear();
                body = rest;
            }
        }
        self.current.extend_from_slice(body);

        if !complete || self.current.is_empty() {
            return Ok(None);
        }

        let stuffed = self.current.split();
        let decoded = cobs::decode(&stuffed)?;
        if decoded.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        Ok(Some(decoded))
    }

    /// Returns the number of bytes of the partial frame.
    pub fn buffered(&self) -> usize {
        self.current.len()
    }

    /// Drops any partial frame.
    pub fn clear(&mut self) {
        self.current.clear();
    }
}
