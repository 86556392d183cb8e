//! # r10link-protocol
//!
//! Wire protocol spoken by the launch monitor over its BLE device-interface
//! service.
//!
//! This crate provides:
//! - COBS byte stuffing with `0x00` packet delimiters
//! - CRC-16/ARC frame integrity checks
//! - MTU-bounded chunking and chunk reassembly
//! - The per-connection handshake state machine
//! - Message classes, protobuf envelopes and acknowledgements
//!
//! Nothing here performs I/O; the device crate drives these types from its
//! reader, processor and writer tasks.

pub mod codec;
pub mod cobs;
pub mod crc;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;

pub use codec::{ChecksumPolicy, Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{chunk, CheckedFrame, Frame, Reassembler, FRAME_OVERHEAD};
pub use handshake::{Handshake, HandshakeState};
pub use message::{Message, MessageClass};

/// Maximum number of frame bytes carried by one BLE write or notification,
/// not counting the session header byte.
pub const MAX_CHUNK_SIZE: usize = 19;

/// Packet delimiter surrounding every COBS-encoded frame.
pub const DELIMITER: u8 = 0x00;
