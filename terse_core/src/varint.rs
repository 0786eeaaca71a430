//! Unsigned LEB128 variable-length integers, as used for every count and
//! dimension in the stream format.

use std::io::{Read, Write};

use crate::error::{Result, TerseError};

/// Longest valid encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies when encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

pub fn encode(value: u64, buffer: &mut Vec<u8>) {
    let mut current = value;
    loop {
        let byte = (current & 0x7F) as u8;
        current >>= 7;
        if current == 0 {
            buffer.push(byte);
            break;
        }
        buffer.push(byte | 0x80);
    }
}

pub fn write<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode(value, &mut buf);
    writer.write_all(&buf)?;
    Ok(buf.len())
}

/// Reads one varint, one byte at a time, so the reader is never advanced
/// past the integer.
pub fn read<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader
            .read_exact(&mut byte)
            .map_err(|e| TerseError::from_read(e, what))?;
        let payload = (byte[0] & 0x7F) as u64;

        if shift >= 64 || (shift == 63 && payload > 1) {
            return Err(TerseError::Consistency(format!(
                "varint overflow while reading {}",
                what
            )));
        }
        result |= payload << shift;

        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Reads a varint that must fit a `usize`.
pub fn read_usize<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let value = read(reader, what)?;
    usize::try_from(value)
        .map_err(|_| TerseError::Consistency(format!("{} {} does not fit in memory", what, value)))
}
