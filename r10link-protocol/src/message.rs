//! Message classes carried inside frames.
//!
//! Every message starts with a 2-byte class prefix. The two protobuf classes
//! share a 16-byte envelope:
//!
//! ```text
//! +-------+----------+--------+---------+---------+------------------+
//! | class | counter  | 0x0000 | len     | len     | protobuf payload |
//! | 2     | 4 (LE)   | 2      | 4 (LE)  | 4 (LE)  | len bytes        |
//! +-------+----------+--------+---------+---------+------------------+
//! ```
//!
//! The counter is 16 bits wide on the wire side that the peer echoes back
//! (bytes 2..4); the upper two bytes are always zero.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::fmt;

/// Offset of the protobuf payload within a protobuf-class message.
pub const PROTOBUF_PAYLOAD_OFFSET: usize = 16;

/// Number of zero bytes padding a protobuf acknowledgement after the counter.
const ACK_PADDING: usize = 7;

/// Message class prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageClass {
    DeviceInfo,
    Config,
    ProtobufResponse,
    ProtobufRequest,
    Ack,
    Unknown([u8; 2]),
}

impl MessageClass {
    pub const DEVICE_INFO: [u8; 2] = [0xA0, 0x13];
    pub const CONFIG: [u8; 2] = [0xBA, 0x13];
    pub const PROTOBUF_RESPONSE: [u8; 2] = [0xB4, 0x13];
    pub const PROTOBUF_REQUEST: [u8; 2] = [0xB3, 0x13];
    pub const ACK: [u8; 2] = [0x88, 0x13];

    pub fn from_prefix(prefix: [u8; 2]) -> Self {
        match prefix {
            Self::DEVICE_INFO => MessageClass::DeviceInfo,
            Self::CONFIG => MessageClass::Config,
            Self::PROTOBUF_RESPONSE => MessageClass::ProtobufResponse,
            Self::PROTOBUF_REQUEST => MessageClass::ProtobufRequest,
            Self::ACK => MessageClass::Ack,
            other => MessageClass::Unknown(other),
        }
    }

    pub fn prefix(&self) -> [u8; 2] {
        match self {
            MessageClass::DeviceInfo => Self::DEVICE_INFO,
            MessageClass::Config => Self::CONFIG,
            MessageClass::ProtobufResponse => Self::PROTOBUF_RESPONSE,
            MessageClass::ProtobufRequest => Self::PROTOBUF_REQUEST,
            MessageClass::Ack => Self::ACK,
            MessageClass::Unknown(prefix) => *prefix,
        }
    }

    /// Returns whether messages of this class carry a protobuf envelope.
    pub fn is_protobuf(&self) -> bool {
        matches!(
            self,
            MessageClass::ProtobufResponse | MessageClass::ProtobufRequest
        )
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b] = self.prefix();
        write!(f, "{:02X}{:02X}", a, b)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    DeviceInfo(Bytes),
    Config(Bytes),
    ProtobufResponse { counter: u16, payload: Bytes },
    ProtobufRequest { counter: u16, payload: Bytes },
    Ack(Bytes),
    Unknown { class: [u8; 2], body: Bytes },
}

impl Message {
    /// Interprets frame message bytes by their class prefix.
    pub fn parse(message: Bytes) -> Result<Self, ProtocolError> {
        if message.len() < 2 {
            return Err(ProtocolError::MessageTooShort {
                class: hex::encode_upper(&message),
                len: message.len(),
                min: 2,
            });
        }

        let class = MessageClass::from_prefix([message[0], message[1]]);
        if class.is_protobuf() && message.len() < PROTOBUF_PAYLOAD_OFFSET {
            return Err(ProtocolError::MessageTooShort {
                class: class.to_string(),
                len: message.len(),
                min: PROTOBUF_PAYLOAD_OFFSET,
            });
        }

        let body = message.slice(2..);
        Ok(match class {
            MessageClass::DeviceInfo => Message::DeviceInfo(body),
            MessageClass::Config => Message::Config(body),
            MessageClass::ProtobufResponse => Message::ProtobufResponse {
                counter: u16::from_le_bytes([message[2], message[3]]),
                payload: message.slice(PROTOBUF_PAYLOAD_OFFSET..),
            },
            MessageClass::ProtobufRequest => Message::ProtobufRequest {
                counter: u16::from_le_bytes([message[2], message[3]]),
                payload: message.slice(PROTOBUF_PAYLOAD_OFFSET..),
            },
            MessageClass::Ack => Message::Ack(body),
            MessageClass::Unknown(class) => Message::Unknown { class, body },
        })
    }

    pub fn class(&self) -> MessageClass {
        match self {
            Message::DeviceInfo(_) => MessageClass::DeviceInfo,
            Message::Config(_) => MessageClass::Config,
            Message::ProtobufResponse { .. } => MessageClass::ProtobufResponse,
            Message::ProtobufRequest { .. } => MessageClass::ProtobufRequest,
            Message::Ack(_) => MessageClass::Ack,
            Message::Unknown { class, .. } => MessageClass::Unknown(*class),
        }
    }

    /// Returns the correlation counter of protobuf messages.
    pub fn counter(&self) -> Option<u16> {
        match self {
            Message::ProtobufResponse { counter, .. } | Message::ProtobufRequest { counter, .. } => {
                Some(*counter)
            }
            _ => None,
        }
    }

    /// Builds the acknowledgement the peer expects for this message.
    ///
    /// `8813 ∥ class ∥ 00` for plain classes, and
    /// `8813 ∥ class ∥ 00 ∥ counter ∥ 7 zero bytes` for protobuf classes.
    pub fn acknowledgement(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(14);
        buf.put_slice(&MessageClass::ACK);
        buf.put_slice(&self.class().prefix());
        buf.put_u8(0x00);
        if let Some(counter) = self.counter() {
            buf.put_u16_le(counter);
            buf.put_bytes(0x00, ACK_PADDING);
        }
        buf.freeze()
    }
}

/// Builds an outbound protobuf request message.
pub fn encode_protobuf_request(counter: u16, payload: &[u8]) -> Bytes {
    encode_protobuf(MessageClass::PROTOBUF_REQUEST, counter, payload)
}

/// Builds a protobuf response message, as sent by the peripheral.
pub fn encode_protobuf_response(counter: u16, payload: &[u8]) -> Bytes {
    encode_protobuf(MessageClass::PROTOBUF_RESPONSE, counter, payload)
}

fn encode_protobuf(class: [u8; 2], counter: u16, payload: &[u8]) -> Bytes {
    let len = payload.len() as u32;
    let mut buf = BytesMut::with_capacity(PROTOBUF_PAYLOAD_OFFSET + payload.len());
    buf.put_slice(&class);
    buf.put_u32_le(counter as u32);
    buf.put_u16(0);
    buf.put_u32_le(len);
    buf.put_u32_le(len);
    buf.put_slice(payload);
    buf.freeze()
}
