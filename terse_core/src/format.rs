//! On-wire layout of a serialized Terse container.
//!
//! ```text
//! [STREAM HEADER]  magic "TRPX" | version:u8 | frame_count:varint
//! [FRAME 0]        ndims:varint | dims:varint × ndims | element_type:u8 | mode:u8
//!                  | metadata_len:varint | metadata bytes | block_count:varint
//!   [BLOCK 0]      count:varint | bit_width:u8 | signed_flag:u8
//!                  | base: sizeof(element) bytes LE | payload: ceil(count*bit_width/8) bytes
//!   [BLOCK 1] ...
//! [FRAME 1] ...
//! ```
//!
//! Nothing follows the last frame, so several containers can be written back
//! to back and read in sequence.

use std::io::{Read, Write};

use crate::element::ElementType;
use crate::error::{Result, TerseError};
use crate::settings::Mode;
use crate::varint;

/// Magic bytes opening every Terse stream.
pub const MAGIC: &[u8; 4] = b"TRPX";

/// Only format version written and accepted.
pub const FORMAT_VERSION: u8 = 1;

fn read_byte<R: Read>(reader: &mut R, what: &str) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader
        .read_exact(&mut byte)
        .map_err(|e| TerseError::from_read(e, what))?;
    Ok(byte[0])
}

// ── Stream header ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub frame_count: usize,
}

impl StreamHeader {
    pub fn encoded_len(&self) -> usize {
        MAGIC.len() + 1 + varint::encoded_len(self.frame_count as u64)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        writer.write_all(MAGIC)?;
        writer.write_all(&[FORMAT_VERSION])?;
        let n = varint::write(writer, self.frame_count as u64)?;
        Ok(MAGIC.len() + 1 + n)
    }

    /// Reads and validates the magic and version.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| TerseError::from_read(e, "magic"))?;
        if &magic != MAGIC {
            return Err(TerseError::Consistency(format!(
                "invalid magic bytes {:02x?}, not a Terse stream",
                magic
            )));
        }
        let version = read_byte(reader, "format version")?;
        if version != FORMAT_VERSION {
            return Err(TerseError::Consistency(format!(
                "unsupported format version {} (only version {} is supported)",
                version, FORMAT_VERSION
            )));
        }
        let frame_count = varint::read_usize(reader, "frame count")?;
        Ok(Self { frame_count })
    }
}

// ── Frame header ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub dims: Vec<usize>,
    pub element_type: ElementType,
    pub mode: Mode,
    pub metadata: String,
    pub block_count: usize,
}

impl FrameHeader {
    pub fn encoded_len(&self) -> usize {
        varint::encoded_len(self.dims.len() as u64)
            + self
                .dims
                .iter()
                .map(|&d| varint::encoded_len(d as u64))
                .sum::<usize>()
            + 2
            + varint::encoded_len(self.metadata.len() as u64)
            + self.metadata.len()
            + varint::encoded_len(self.block_count as u64)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        varint::encode(self.dims.len() as u64, &mut buf);
        for &dim in &self.dims {
            varint::encode(dim as u64, &mut buf);
        }
        buf.push(self.element_type.tag());
        buf.push(self.mode.tag());
        varint::encode(self.metadata.len() as u64, &mut buf);
        buf.extend_from_slice(self.metadata.as_bytes());
        varint::encode(self.block_count as u64, &mut buf);
        writer.write_all(&buf)?;
        Ok(buf.len())
    }

    /// Reads a frame header. Dims must be non-empty and positive, and the
    /// element type and mode tags must be known.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let ndims = varint::read_usize(reader, "dimension count")?;
        if ndims == 0 {
            return Err(TerseError::Consistency(
                "frame declares zero dimensions".to_string(),
            ));
        }
        let mut dims = Vec::new();
        for _ in 0..ndims {
            let dim = varint::read_usize(reader, "dimension")?;
            if dim == 0 {
                return Err(TerseError::Consistency(
                    "frame declares an empty dimension".to_string(),
                ));
            }
            dims.push(dim);
        }

        let tag = read_byte(reader, "element type")?;
        let element_type = ElementType::from_tag(tag as u32).map_err(|_| {
            TerseError::Consistency(format!("unknown element type tag {}", tag))
        })?;
        let tag = read_byte(reader, "mode")?;
        let mode = Mode::from_tag(tag as u32)
            .ok_or_else(|| TerseError::Consistency(format!("unknown mode tag {}", tag)))?;

        let metadata_len = varint::read(reader, "metadata length")?;
        let mut bytes = Vec::new();
        let read = reader.by_ref().take(metadata_len).read_to_end(&mut bytes)?;
        if (read as u64) < metadata_len {
            return Err(TerseError::Consistency(
                "truncated stream while reading metadata".to_string(),
            ));
        }
        let metadata = String::from_utf8(bytes)
            .map_err(|_| TerseError::Consistency("metadata is not valid UTF-8".to_string()))?;

        let block_count = varint::read_usize(reader, "block count")?;
        Ok(Self {
            dims,
            element_type,
            mode,
            metadata,
            block_count,
        })
    }
}

// ── Block header ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub count: usize,
    pub bit_width: u8,
    pub signed: bool,
    /// Sign-extended (signed) or zero-extended (unsigned) 64-bit word.
    pub base: u64,
}

impl BlockHeader {
    pub fn encoded_len(&self, ty: ElementType) -> usize {
        varint::encoded_len(self.count as u64) + 2 + ty.width()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W, ty: ElementType) -> Result<usize> {
        let mut buf = Vec::with_capacity(varint::MAX_VARINT_LEN + 2 + 8);
        varint::encode(self.count as u64, &mut buf);
        buf.push(self.bit_width);
        buf.push(self.signed as u8);
        buf.extend_from_slice(&self.base.to_le_bytes()[..ty.width()]);
        writer.write_all(&buf)?;
        Ok(buf.len())
    }

    pub fn read_from<R: Read>(reader: &mut R, ty: ElementType) -> Result<Self> {
        let count = varint::read_usize(reader, "block element count")?;
        let bit_width = read_byte(reader, "bit width")?;
        if bit_width > ty.bits() {
            return Err(TerseError::Consistency(format!(
                "bit width {} exceeds the {}-bit element type {}",
                bit_width,
                ty.bits(),
                ty
            )));
        }
        let signed = match read_byte(reader, "signed flag")? {
            0 => false,
            1 => true,
            other => {
                return Err(TerseError::Consistency(format!(
                    "signed flag must be 0 or 1, got {}",
                    other
                )))
            }
        };

        let width = ty.width();
        let mut raw = [0u8; 8];
        reader
            .read_exact(&mut raw[..width])
            .map_err(|e| TerseError::from_read(e, "block base"))?;
        let mut base = u64::from_le_bytes(raw);
        if signed && width < 8 {
            let shift = 64 - 8 * width as u32;
            base = (((base << shift) as i64) >> shift) as u64;
        }

        Ok(Self {
            count,
            bit_width,
            signed,
            base,
        })
    }
}
