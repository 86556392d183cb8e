//! CRC-16/ARC frame checksum.
//!
//! Reflected polynomial 0x8005 (0xA001 in reflected form), initial value 0,
//! no final XOR. Stored little-endian after the frame body.

use crc::{Crc, CRC_16_ARC};

/// Table-driven CRC-16/ARC engine.
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Computes the checksum of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Computes the checksum of `data` in wire byte order.
pub fn checksum_le(data: &[u8]) -> [u8; 2] {
    checksum(data).to_le_bytes()
}
