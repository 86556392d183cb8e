//! Encoder and decoder for chunked frames and messages.

use crate::error::ProtocolError;
use crate::frame::{chunk, CheckedFrame, Frame, Reassembler};
use crate::message::{self, Message};
use crate::MAX_CHUNK_SIZE;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// What to do with a frame whose CRC does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Discard the frame.
    #[default]
    Drop,
    /// Deliver the frame anyway.
    Deliver,
}

/// Frames messages and splits them into header-prefixed chunks.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    max_chunk: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(MAX_CHUNK_SIZE)
    }
}

impl Encoder {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
        }
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Encodes message bytes into the chunks to write, in order.
    pub fn encode(&self, message: &[u8], header: u8) -> Result<Vec<Bytes>, ProtocolError> {
        let frame = Frame::new(Bytes::copy_from_slice(message));
        let encoded = frame.encode()?;
        Ok(chunk(&encoded, header, self.max_chunk))
    }

    /// Encodes a protobuf request with the given counter.
    pub fn encode_protobuf_request(
        &self,
        counter: u16,
        payload: &[u8],
        header: u8,
    ) -> Result<Vec<Bytes>, ProtocolError> {
        self.encode(&message::encode_protobuf_request(counter, payload), header)
    }

    /// Encodes the acknowledgement for an inbound message.
    pub fn encode_ack(&self, inbound: &Message, header: u8) -> Result<Vec<Bytes>, ProtocolError> {
        self.encode(&inbound.acknowledgement(), header)
    }
}

/// Reassembles chunk bodies into checked frames and messages.
#[derive(Debug, Default)]
pub struct Decoder {
    reassembler: Reassembler,
    policy: ChecksumPolicy,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ChecksumPolicy) -> Self {
        Self {
            reassembler: Reassembler::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ChecksumPolicy {
        self.policy
    }

    /// Feeds one chunk body (header stripped) and returns the checked frame
    /// it completes, if any. The checksum verdict is left to the caller.
    pub fn decode_frame(&mut self, body: &[u8]) -> Result<Option<CheckedFrame>, ProtocolError> {
        match self.reassembler.push(body)? {
            Some(decoded) => Frame::check(&decoded).map(Some),
            None => Ok(None),
        }
    }

    /// Feeds one chunk body and returns the message it completes, if any.
    ///
    /// Applies the checksum policy: under `Drop` a mismatch is returned as
    /// `CrcMismatch`; under `Deliver` the message is parsed anyway.
    pub fn decode_message(&mut self, body: &[u8]) -> Result<Option<Message>, ProtocolError> {
        let Some(checked) = self.decode_frame(body)? else {
            return Ok(None);
        };

        let frame = match self.policy {
            ChecksumPolicy::Drop => checked.into_verified()?,
            ChecksumPolicy::Deliver => checked.frame,
        };
        Message::parse(frame.message).map(Some)
    }

    /// Returns the number of bytes of the partial frame.
    pub fn buffered(&self) -> usize {
        self.reassembler.buffered()
    }

    /// Drops any partial frame.
    pub fn clear(&mut self) {
        self.reassembler.clear();
    }
}
