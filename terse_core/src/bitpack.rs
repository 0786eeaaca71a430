//! Fixed-width bit-packing of one block of 64-bit words.
//!
//! Each value is stored as `value - base` (wrapping) in exactly `bit_width`
//! bits, least significant bit first, with no padding between values; only the
//! final byte is padded with zero bits. The layout is defined on bytes, so it is
//! identical on little- and big-endian hosts. `bit_width == 0` denotes a
//! constant block whose payload is empty.

use crate::error::{Result, TerseError};

/// Widest supported value.
pub const MAX_BIT_WIDTH: u8 = 64;

/// Payload size in bytes of `count` values of `bit_width` bits.
#[inline]
pub fn packed_len(count: usize, bit_width: u8) -> usize {
    count.saturating_mul(bit_width as usize).div_ceil(8)
}

/// Number of bits needed to hold `range` (`ceil(log2(range + 1))`).
#[inline]
pub fn bits_for(range: u64) -> u8 {
    (64 - range.leading_zeros()) as u8
}

#[inline]
fn mask(bit_width: u8) -> u64 {
    if bit_width >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_width) - 1
    }
}

/// Packs `values` into a freshly allocated buffer.
pub fn pack(values: &[u64], bit_width: u8, base: u64) -> Result<Vec<u8>> {
    let mut out = vec![0u8; packed_len(values.len(), bit_width)];
    pack_into(&mut out, values.iter().copied(), bit_width, base)?;
    Ok(out)
}

/// Packs `values` into `dst`, which must be exactly
/// `packed_len(count, bit_width)` bytes long. Fails with `Encoding` on the first
/// value whose offset from `base` needs more than `bit_width` bits; `dst` is
/// then partially written and must be discarded by the caller.
pub fn pack_into<I>(dst: &mut [u8], values: I, bit_width: u8, base: u64) -> Result<()>
where
    I: IntoIterator<Item = u64>,
{
    if bit_width > MAX_BIT_WIDTH {
        return Err(TerseError::Encoding(0, bit_width));
    }
    let limit = mask(bit_width);
    let mut acc: u128 = 0;
    let mut pending: u32 = 0;
    let mut pos = 0usize;

    for value in values {
        let offset = value.wrapping_sub(base);
        if offset > limit {
            return Err(TerseError::Encoding(offset, bit_width));
        }
        if bit_width == 0 {
            continue;
        }
        acc |= (offset as u128) << pending;
        pending += bit_width as u32;
        while pending >= 8 {
            let slot = dst
                .get_mut(pos)
                .ok_or(TerseError::Encoding(offset, bit_width))?;
            *slot = acc as u8;
            acc >>= 8;
            pending -= 8;
            pos += 1;
        }
    }
    if pending > 0 {
        let slot = dst.get_mut(pos).ok_or(TerseError::Encoding(0, bit_width))?;
        *slot = acc as u8;
    }
    Ok(())
}

/// Iterator over the raw offsets stored in a packed payload.
pub struct Offsets<'a> {
    bytes: &'a [u8],
    remaining: usize,
    bit_width: u8,
    acc: u128,
    pending: u32,
    pos: usize,
}

impl Iterator for Offsets<'_> {
    type Item = u64;

    #[inline]
    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if self.bit_width == 0 {
            return Some(0);
        }
        while self.pending < self.bit_width as u32 {
            // length was checked against packed_len up front
            self.acc |= (self.bytes[self.pos] as u128) << self.pending;
            self.pos += 1;
            self.pending += 8;
        }
        let value = (self.acc as u64) & mask(self.bit_width);
        self.acc >>= self.bit_width;
        self.pending -= self.bit_width as u32;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Offsets<'_> {}

/// Iterates over the `count` offsets packed in `bytes`, without adding the base.
pub fn offsets(bytes: &[u8], count: usize, bit_width: u8) -> Result<Offsets<'_>> {
    if bit_width > MAX_BIT_WIDTH {
        return Err(TerseError::Consistency(format!(
            "bit width {} exceeds {}",
            bit_width, MAX_BIT_WIDTH
        )));
    }
    let needed = packed_len(count, bit_width);
    if bytes.len() < needed {
        return Err(TerseError::Consistency(format!(
            "packed payload truncated: {} bytes, {} needed",
            bytes.len(),
            needed
        )));
    }
    Ok(Offsets {
        bytes,
        remaining: count,
        bit_width,
        acc: 0,
        pending: 0,
        pos: 0,
    })
}

/// Exact inverse of [`pack`].
pub fn unpack(bytes: &[u8], count: usize, bit_width: u8, base: u64) -> Result<Vec<u64>> {
    Ok(offsets(bytes, count, bit_width)?
        .map(|offset| base.wrapping_add(offset))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_lsb_first_without_padding() {
        // 3, 4, 2 in 3 bits: 011 | 100 | 010 -> bits LSB first
        let packed = pack(&[3, 4, 2], 3, 0).unwrap();
        assert_eq!(packed.len(), 2);
        assert_eq!(packed, vec![0b1010_0011, 0b0000_0000]);
        assert_eq!(unpack(&packed, 3, 3, 0).unwrap(), vec![3, 4, 2]);
    }

    #[test]
    fn offsets_are_relative_to_base() {
        let values = [1000u64, 1003, 1001, 1007];
        let packed = pack(&values, 3, 1000).unwrap();
        assert_eq!(packed.len(), packed_len(4, 3));
        assert_eq!(unpack(&packed, 4, 3, 1000).unwrap(), values.to_vec());
    }

    #[test]
    fn zero_width_is_a_constant_block() {
        let packed = pack(&[42, 42, 42], 0, 42).unwrap();
        assert!(packed.is_empty());
        assert_eq!(unpack(&packed, 3, 0, 42).unwrap(), vec![42, 42, 42]);
    }

    #[test]
    fn full_width_values_survive() {
        let values = [u64::MAX, 0, 1 << 63, 12345];
        let packed = pack(&values, 64, 0).unwrap();
        assert_eq!(packed.len(), 32);
        assert_eq!(unpack(&packed, 4, 64, 0).unwrap(), values.to_vec());

        // wrapping offsets: sign-extended words relative to a negative base
        let base = (-5i64) as u64;
        let signed = [(-5i64) as u64, (-1i64) as u64, 2];
        let packed = pack(&signed, 3, base).unwrap();
        assert_eq!(unpack(&packed, 3, 3, base).unwrap(), signed.to_vec());
    }

    #[test]
    fn out_of_range_value_is_an_encoding_error() {
        match pack(&[1, 2, 9], 3, 0) {
            Err(TerseError::Encoding(offset, width)) => {
                assert_eq!(offset, 9);
                assert_eq!(width, 3);
            }
            other => panic!("expected Encoding error, got {other:?}"),
        }
        assert!(pack(&[5, 4], 2, 5).is_err()); // 4 - 5 wraps to a huge offset
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let packed = pack(&[1, 2, 3, 4, 5], 7, 0).unwrap();
        assert!(matches!(
            unpack(&packed[..packed.len() - 1], 5, 7, 0),
            Err(TerseError::Consistency(_))
        ));
    }

    #[test]
    fn bits_for_ranges() {
        assert_eq!(bits_for(0), 0);
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 2);
        assert_eq!(bits_for(255), 8);
        assert_eq!(bits_for(256), 9);
        assert_eq!(bits_for(u64::MAX), 64);
    }
}
