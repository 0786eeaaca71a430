use std::io::{Read, Write};

use crate::block::{self, Block};
use crate::element::{Element, ElementType, TypedArray};
use crate::error::{Result, TerseError};
use crate::format::{BlockHeader, FrameHeader};
use crate::settings::{Mode, Settings};
use crate::{with_element_type, with_typed_array};

/// Checks that `dims` is non-empty, strictly positive and covers exactly `len`
/// elements.
pub(crate) fn check_dims(dims: &[usize], len: usize) -> Result<()> {
    if dims.is_empty() {
        return Err(TerseError::Shape("dims must not be empty".to_string()));
    }
    if dims.contains(&0) {
        return Err(TerseError::Shape(format!(
            "dims {:?} contain a zero extent",
            dims
        )));
    }
    let product = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| TerseError::Shape(format!("dims {:?} overflow the element count", dims)))?;
    if product != len {
        return Err(TerseError::Shape(format!(
            "dims {:?} describe {} elements, data has {}",
            dims, product, len
        )));
    }
    Ok(())
}

/// One compressed multi-dimensional array.
///
/// The frame owns its block list and a single payload arena holding every
/// block's packed bytes back to back. The arena may carry spare capacity left
/// over from encoding; [`Frame::compact`] releases it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    dims: Vec<usize>,
    element_type: ElementType,
    mode: Mode,
    metadata: String,
    blocks: Vec<Block>,
    payload: Vec<u8>,
}

impl Frame {
    /// Compresses `data` eagerly with `settings`.
    pub fn from_slice<T: Element>(
        data: &[T],
        dims: &[usize],
        mode: Mode,
        settings: &Settings,
    ) -> Result<Self> {
        let settings = settings.validate()?;
        check_dims(dims, data.len())?;
        let encoded = block::encode(data, mode, &settings)?;
        Ok(Self {
            dims: dims.to_vec(),
            element_type: T::TYPE,
            mode,
            metadata: String::new(),
            blocks: encoded.blocks,
            payload: encoded.payload,
        })
    }

    pub fn from_array(
        data: &TypedArray,
        dims: &[usize],
        mode: Mode,
        settings: &Settings,
    ) -> Result<Self> {
        with_typed_array!(data, values => Frame::from_slice(values, dims, mode, settings))
    }

    /// Re-encodes the frame with `settings`. The frame is left unchanged on
    /// failure.
    pub fn reencode(&mut self, settings: &Settings) -> Result<()> {
        let data = self.decompress_with(settings)?;
        let mut fresh = Frame::from_array(&data, &self.dims, self.mode, settings)?;
        fresh.metadata = std::mem::take(&mut self.metadata);
        *self = fresh;
        Ok(())
    }

    /// Decompresses using every available worker.
    pub fn decompress(&self) -> Result<TypedArray> {
        self.decompress_with(&Settings::default())
    }

    /// Decompresses with the worker count derived from `settings`.
    pub fn decompress_with(&self, settings: &Settings) -> Result<TypedArray> {
        with_element_type!(self.element_type, T => {
            let mut out = vec![T::from_word(0); self.size()];
            self.decode(&mut out, settings.workers())?;
            Ok(T::wrap(out))
        })
    }

    /// Decompresses into a typed vector; fails with `TypeMismatch` unless `T`
    /// is the stored element type.
    pub fn decompress_as<T: Element>(&self) -> Result<Vec<T>> {
        let mut out = vec![T::from_word(0); self.size()];
        self.decompress_into(&mut out)?;
        Ok(out)
    }

    /// Decompresses into a caller-provided buffer of exactly `size()` elements.
    pub fn decompress_into<T: Element>(&self, out: &mut [T]) -> Result<()> {
        self.decompress_into_with(out, &Settings::default())
    }

    pub(crate) fn decompress_into_with<T: Element>(
        &self,
        out: &mut [T],
        settings: &Settings,
    ) -> Result<()> {
        if T::TYPE != self.element_type {
            return Err(TerseError::TypeMismatch {
                expected: self.element_type,
                found: T::TYPE,
            });
        }
        if out.len() != self.size() {
            return Err(TerseError::Shape(format!(
                "output holds {} elements, frame has {}",
                out.len(),
                self.size()
            )));
        }
        self.decode(out, settings.workers())
    }

    fn decode<T: Element>(&self, out: &mut [T], workers: usize) -> Result<()> {
        block::decode_into(&self.blocks, &self.payload, out, workers)?;
        log::trace!(
            "decoded {} {} values from {} blocks",
            out.len(),
            self.element_type,
            self.blocks.len()
        );
        Ok(())
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Reshapes the frame. The new dims must cover the same element count.
    pub fn set_dim(&mut self, dims: &[usize]) -> Result<()> {
        check_dims(dims, self.size())?;
        self.dims = dims.to_vec();
        Ok(())
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_signed(&self) -> bool {
        self.element_type.is_signed()
    }

    pub fn bits_per_val(&self) -> u8 {
        self.element_type.bits()
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: impl Into<String>) {
        self.metadata = metadata.into();
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Packed bytes of block `index`.
    pub fn block_payload(&self, index: usize) -> Option<&[u8]> {
        let block = self.blocks.get(index)?;
        self.payload
            .get(block.payload_offset()..block.payload_offset() + block.payload_len())
    }

    /// Total packed payload bytes, excluding all headers.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    fn header(&self) -> FrameHeader {
        FrameHeader {
            dims: self.dims.clone(),
            element_type: self.element_type,
            mode: self.mode,
            metadata: self.metadata.clone(),
            block_count: self.blocks.len(),
        }
    }

    /// Serialized size of this frame: frame header, block headers and payloads.
    pub fn used_bytes(&self) -> usize {
        self.header().encoded_len()
            + self
                .blocks
                .iter()
                .map(|b| b.header_len(self.element_type))
                .sum::<usize>()
            + self.payload.len()
    }

    /// `used_bytes` plus the spare capacity of the payload arena.
    pub fn reserved_bytes(&self) -> usize {
        self.used_bytes() - self.payload.len() + self.payload.capacity()
    }

    /// Releases spare payload capacity so that `reserved_bytes == used_bytes`.
    pub fn compact(&mut self) {
        let payload = std::mem::take(&mut self.payload);
        self.payload = payload.into_boxed_slice().into_vec();
        self.blocks.shrink_to_fit();
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = self.header().write_to(writer)?;
        for block in &self.blocks {
            let header = BlockHeader {
                count: block.count(),
                bit_width: block.bit_width(),
                signed: block.is_signed(),
                base: block.base(),
            };
            written += header.write_to(writer, self.element_type)?;
            let start = block.payload_offset();
            writer.write_all(&self.payload[start..start + block.payload_len()])?;
            written += block.payload_len();
        }
        Ok(written)
    }

    /// Reads one frame, validating that its blocks cover exactly the element
    /// count its dims describe.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let header = FrameHeader::read_from(reader)?;
        let expected = header
            .dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                TerseError::Consistency(format!("dims {:?} overflow the element count", header.dims))
            })?;

        let mut blocks = Vec::new();
        let mut payload = Vec::new();
        let mut total = 0usize;
        for _ in 0..header.block_count {
            let bh = BlockHeader::read_from(reader, header.element_type)?;
            total = total
                .checked_add(bh.count)
                .filter(|&t| t <= expected)
                .ok_or_else(|| {
                    TerseError::Consistency(format!(
                        "blocks hold more than the {} elements of dims {:?}",
                        expected, header.dims
                    ))
                })?;
            let block = Block {
                count: bh.count,
                bit_width: bh.bit_width,
                signed: bh.signed,
                base: bh.base,
                offset: payload.len(),
            };
            let len = block.payload_len() as u64;
            let read = reader.by_ref().take(len).read_to_end(&mut payload)?;
            if (read as u64) < len {
                return Err(TerseError::Consistency(
                    "truncated stream while reading block payload".to_string(),
                ));
            }
            blocks.push(block);
        }
        if total != expected {
            return Err(TerseError::Consistency(format!(
                "blocks hold {} elements but dims {:?} describe {}",
                total, header.dims, expected
            )));
        }

        Ok(Self {
            dims: header.dims,
            element_type: header.element_type,
            mode: header.mode,
            metadata: header.metadata,
            blocks,
            payload,
        })
    }
}
