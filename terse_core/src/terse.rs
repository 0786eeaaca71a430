//! The Terse container: an ordered sequence of frames sharing one shape and
//! one element type, plus the settings used for every subsequent encode.
//!
//! Several accessors (`size`, `dim`, `decompress`, `is_signed`, ...) read the
//! first frame, which is "the" array for a container built from a single
//! array. [`Terse::implicit`] makes that view explicit for callers that need
//! to tell a single array from a sequence.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::element::{Element, ElementType, TypedArray};
use crate::error::{Result, TerseError};
use crate::format::StreamHeader;
use crate::frame::Frame;
use crate::reader::Reader;
use crate::settings::{Mode, Settings};
use crate::with_element_type;
use crate::writer::Writer;

/// How the frames of a container present themselves to the convenience
/// accessors.
#[derive(Debug, Clone, Copy)]
pub enum Implicit<'a> {
    Empty,
    Single(&'a Frame),
    Sequence(&'a [Frame]),
}

#[derive(Debug, Clone, Default)]
pub struct Terse {
    frames: Vec<Frame>,
    settings: Settings,
}

impl Terse {
    /// Empty container with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Result<Self> {
        Ok(Self {
            frames: Vec::new(),
            settings: settings.validate()?,
        })
    }

    /// Container holding `data` as its single, implicit frame.
    pub fn from_slice<T: Element>(data: &[T], dims: &[usize], mode: Mode) -> Result<Self> {
        let mut terse = Self::new();
        terse.append(data, dims, mode)?;
        Ok(terse)
    }

    pub fn from_array(data: &TypedArray, dims: &[usize], mode: Mode) -> Result<Self> {
        let mut terse = Self::new();
        terse.append_array(data, dims, mode)?;
        Ok(terse)
    }

    // ── Settings ───────────────────────────────────────────────────────────

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Replaces the settings used by subsequent encodes. Frames already in the
    /// container keep their layout until [`recompress`](Terse::recompress).
    pub fn set_settings(&mut self, settings: Settings) -> Result<()> {
        self.settings = settings.validate()?;
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.settings.block_size
    }

    pub fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        self.set_settings(Settings {
            block_size,
            ..self.settings
        })
    }

    pub fn fast(&self) -> bool {
        self.settings.fast
    }

    pub fn set_fast(&mut self, fast: bool) {
        self.settings.fast = fast;
    }

    pub fn small(&self) -> bool {
        self.settings.small
    }

    pub fn set_small(&mut self, small: bool) {
        self.settings.small = small;
    }

    pub fn dop(&self) -> f64 {
        self.settings.degree_of_parallelism
    }

    pub fn set_dop(&mut self, degree_of_parallelism: f64) -> Result<()> {
        self.set_settings(Settings {
            degree_of_parallelism,
            ..self.settings
        })
    }

    // ── Frame sequence ─────────────────────────────────────────────────────

    /// New frames must match the dims and element type of the frames already
    /// present.
    fn check_uniform(&self, frame: &Frame) -> Result<()> {
        let Some(first) = self.frames.first() else {
            return Ok(());
        };
        if first.element_type() != frame.element_type() {
            return Err(TerseError::TypeMismatch {
                expected: first.element_type(),
                found: frame.element_type(),
            });
        }
        if first.dims() != frame.dims() {
            return Err(TerseError::Shape(format!(
                "frame dims {:?} differ from the container's {:?}",
                frame.dims(),
                first.dims()
            )));
        }
        Ok(())
    }

    fn check_insert_index(&self, index: usize) -> Result<()> {
        if index > self.frames.len() {
            return Err(TerseError::Index {
                index,
                len: self.frames.len(),
            });
        }
        Ok(())
    }

    fn frame_index(&self, index: usize) -> Result<usize> {
        if index >= self.frames.len() {
            return Err(TerseError::Index {
                index,
                len: self.frames.len(),
            });
        }
        Ok(index)
    }

    pub fn append<T: Element>(&mut self, data: &[T], dims: &[usize], mode: Mode) -> Result<()> {
        let frame = Frame::from_slice(data, dims, mode, &self.settings)?;
        self.push_frame(frame)
    }

    pub fn append_array(&mut self, data: &TypedArray, dims: &[usize], mode: Mode) -> Result<()> {
        let frame = Frame::from_array(data, dims, mode, &self.settings)?;
        self.push_frame(frame)
    }

    /// Appends an already encoded frame.
    pub fn push_frame(&mut self, frame: Frame) -> Result<()> {
        self.check_uniform(&frame)?;
        self.frames.push(frame);
        Ok(())
    }

    pub fn insert_at<T: Element>(
        &mut self,
        index: usize,
        data: &[T],
        dims: &[usize],
        mode: Mode,
    ) -> Result<()> {
        self.check_insert_index(index)?;
        let frame = Frame::from_slice(data, dims, mode, &self.settings)?;
        self.insert_frame(index, frame)
    }

    pub fn insert_array_at(
        &mut self,
        index: usize,
        data: &TypedArray,
        dims: &[usize],
        mode: Mode,
    ) -> Result<()> {
        self.check_insert_index(index)?;
        let frame = Frame::from_array(data, dims, mode, &self.settings)?;
        self.insert_frame(index, frame)
    }

    pub fn insert_frame(&mut self, index: usize, frame: Frame) -> Result<()> {
        self.check_insert_index(index)?;
        self.check_uniform(&frame)?;
        self.frames.insert(index, frame);
        Ok(())
    }

    /// Removes and returns the frame at `index`.
    pub fn remove_at(&mut self, index: usize) -> Result<Frame> {
        let index = self.frame_index(index)?;
        Ok(self.frames.remove(index))
    }

    pub fn at(&self, index: usize) -> Result<&Frame> {
        let index = self.frame_index(index)?;
        Ok(&self.frames[index])
    }

    fn at_mut(&mut self, index: usize) -> Result<&mut Frame> {
        let index = self.frame_index(index)?;
        Ok(&mut self.frames[index])
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn number_of_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Appends every frame of `other`. Nothing is appended unless all of them
    /// fit the container's dims and element type.
    pub fn extend(&mut self, other: Terse) -> Result<()> {
        for frame in &other.frames {
            self.check_uniform(frame)?;
        }
        self.frames.extend(other.frames);
        Ok(())
    }

    /// Re-encodes every frame with the current settings. Either all frames are
    /// replaced or none is.
    pub fn recompress(&mut self) -> Result<()> {
        let mut fresh = self.frames.clone();
        for frame in &mut fresh {
            frame.reencode(&self.settings)?;
        }
        self.frames = fresh;
        Ok(())
    }

    // ── Implicit frame ─────────────────────────────────────────────────────

    pub fn implicit(&self) -> Implicit<'_> {
        match self.frames.as_slice() {
            [] => Implicit::Empty,
            [single] => Implicit::Single(single),
            many => Implicit::Sequence(many),
        }
    }

    /// Element count of the first frame, 0 when empty.
    pub fn size(&self) -> usize {
        self.frames.first().map_or(0, Frame::size)
    }

    /// Dims of the first frame, empty when there are no frames.
    pub fn dim(&self) -> &[usize] {
        self.frames.first().map(Frame::dims).unwrap_or(&[])
    }

    /// Reshapes every frame. Frames share their dims, so either all are
    /// reshaped or none is.
    pub fn set_dim(&mut self, dims: &[usize]) -> Result<()> {
        let Some(first) = self.frames.first_mut() else {
            return Err(TerseError::Shape(
                "cannot reshape a container without frames".to_string(),
            ));
        };
        first.set_dim(dims)?;
        for frame in self.frames.iter_mut().skip(1) {
            frame.set_dim(dims)?;
        }
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.frames.first().is_some_and(Frame::is_signed)
    }

    pub fn element_type(&self) -> Option<ElementType> {
        self.frames.first().map(Frame::element_type)
    }

    /// Bit depth of the stored element type, 0 when empty.
    pub fn bits_per_val(&self) -> u8 {
        self.frames.first().map_or(0, Frame::bits_per_val)
    }

    pub fn decompress(&self) -> Result<TypedArray> {
        self.at(0)?.decompress_with(&self.settings)
    }

    pub fn decompress_as<T: Element>(&self) -> Result<Vec<T>> {
        let frame = self.at(0)?;
        let mut out = vec![T::from_word(0); frame.size()];
        frame.decompress_into_with(&mut out, &self.settings)?;
        Ok(out)
    }

    /// Concatenates every frame, in order, into one flat array of
    /// `size() * number_of_frames()` elements.
    pub fn decompress_all(&self) -> Result<TypedArray> {
        let first = self.at(0)?;
        let size = first.size();
        with_element_type!(first.element_type(), T => {
            let mut out = vec![T::from_word(0); size * self.frames.len()];
            for (frame, chunk) in self.frames.iter().zip(out.chunks_mut(size)) {
                frame.decompress_into_with(chunk, &self.settings)?;
            }
            Ok(T::wrap(out))
        })
    }

    // ── Metadata ───────────────────────────────────────────────────────────

    pub fn metadata(&self, index: usize) -> Result<&str> {
        Ok(self.at(index)?.metadata())
    }

    pub fn set_metadata(&mut self, index: usize, metadata: impl Into<String>) -> Result<()> {
        self.at_mut(index)?.set_metadata(metadata);
        Ok(())
    }

    // ── Sizes ──────────────────────────────────────────────────────────────

    fn stream_header(&self) -> StreamHeader {
        StreamHeader {
            frame_count: self.frames.len(),
        }
    }

    /// Serialized size of the whole container.
    pub fn used_bytes(&self) -> usize {
        self.stream_header().encoded_len() + self.frames.iter().map(Frame::used_bytes).sum::<usize>()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.stream_header().encoded_len()
            + self.frames.iter().map(Frame::reserved_bytes).sum::<usize>()
    }

    pub fn compact(&mut self) {
        self.frames.iter_mut().for_each(Frame::compact);
        self.frames.shrink_to_fit();
    }

    /// Packed payload bytes of all frames, without any header.
    pub fn terse_size(&self) -> usize {
        self.frames.iter().map(Frame::payload_len).sum()
    }

    /// Exact length of [`write`](Terse::write)'s output, computed without
    /// serializing.
    pub fn file_size(&self) -> usize {
        self.used_bytes()
    }

    // ── Serialization ──────────────────────────────────────────────────────

    /// Serializes the container and returns the number of bytes written.
    pub fn write<W: Write>(&self, writer: W) -> Result<usize> {
        let mut writer = Writer::new(writer, self.frames.len())?;
        for frame in &self.frames {
            writer.write_frame(frame)?;
        }
        writer.finish()
    }

    /// Reads exactly one serialized container. Bytes following it are left
    /// unread.
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        let mut terse = Self::new();
        for frame in Reader::new(reader)? {
            terse.push_frame(frame?).map_err(|e| {
                TerseError::Consistency(format!("frames of one stream are not uniform: {}", e))
            })?;
        }
        Ok(terse)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<usize> {
        let mut file = BufWriter::new(File::create(path)?);
        let written = self.write(&mut file)?;
        file.flush()?;
        Ok(written)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::read(BufReader::new(File::open(path)?))
    }
}
