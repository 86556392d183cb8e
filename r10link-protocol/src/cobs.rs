//! Consistent Overhead Byte Stuffing.
//!
//! Removes every `0x00` from a buffer so that `0x00` can delimit frames on
//! the wire. Each block is a distance byte followed by up to 254 non-zero
//! data bytes; a distance below `0xFF` implies a zero after the block unless
//! the block is the last one.

use crate::error::ProtocolError;

/// Largest distance byte; marks a full block of 254 data bytes with no
/// implied zero.
const MAX_DISTANCE: u8 = 0xFF;

/// Encoded length at which a single full block is emitted without a
/// trailing distance byte.
const FULL_BLOCK_LEN: usize = MAX_DISTANCE as usize;

/// Encodes `input`. Empty input encodes to empty output.
pub fn encode(input: &[u8]) -> Vec<u8> {
    if input.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(input.len() + input.len() / 254 + 2);
    let mut distance_idx = 0;
    let mut distance: u8 = 1;
    let mut after_full_block = false;
    out.push(0);

    for &byte in input {
        if byte == 0 {
            out[distance_idx] = distance;
            distance_idx = out.len();
            out.push(0);
            distance = 1;
            after_full_block = false;
        } else {
            out.push(byte);
            distance += 1;
            if distance == MAX_DISTANCE {
                out[distance_idx] = distance;
                distance_idx = out.len();
                out.push(0);
                distance = 1;
                after_full_block = true;
            }
        }
    }

    // A single full block needs no trailing distance byte.
    if distance == 1 && after_full_block && distance_idx == FULL_BLOCK_LEN {
        out.truncate(distance_idx);
    } else {
        out[distance_idx] = distance;
    }

    out
}

/// Decodes a COBS buffer (without delimiters).
pub fn decode(input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(input.len());
    let mut idx = 0;

    while idx < input.len() {
        let distance = input[idx] as usize;
        if distance == 0 || idx + distance > input.len() {
            return Err(ProtocolError::CobsDecode { offset: idx });
        }

        out.extend_from_slice(&input[idx + 1..idx + distance]);
        idx += distance;

        if distance < MAX_DISTANCE as usize && idx < input.len() {
            out.push(0);
        }
    }

    Ok(out)
}
