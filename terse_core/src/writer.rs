use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Result, TerseError};
use crate::format::StreamHeader;
use crate::frame::Frame;

/// Streaming writer for Terse containers.
///
/// # Write contract
/// The frame count is part of the stream header, so it must be announced up
/// front. Call [`write_frame`](Writer::write_frame) exactly that many times,
/// then [`finish`](Writer::finish) to flush the sink. Frames can be produced
/// one at a time; the writer never holds more than the frame it is writing.
///
/// # Layout written
/// ```text
/// [STREAM HEADER]  magic | version | frame_count
/// [FRAME 0] [FRAME 1] ... [FRAME N-1]
/// ```
pub struct Writer<W: Write> {
    inner: W,
    announced: usize,
    written: usize,
    bytes: usize,
}

impl Writer<BufWriter<File>> {
    /// Create a new Terse file at `path`, overwriting any existing file.
    pub fn create(path: impl AsRef<Path>, frame_count: usize) -> Result<Self> {
        Writer::new(BufWriter::new(File::create(path)?), frame_count)
    }
}

impl<W: Write> Writer<W> {
    /// Writes the stream header for `frame_count` frames.
    pub fn new(mut inner: W, frame_count: usize) -> Result<Self> {
        let bytes = StreamHeader { frame_count }.write_to(&mut inner)?;
        Ok(Self {
            inner,
            announced: frame_count,
            written: 0,
            bytes,
        })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.written == self.announced {
            return Err(TerseError::Consistency(format!(
                "stream header announced {} frames; refusing to write more",
                self.announced
            )));
        }
        self.bytes += frame.write_to(&mut self.inner)?;
        self.written += 1;
        Ok(())
    }

    /// Frames still owed to the header's frame count.
    pub fn remaining(&self) -> usize {
        self.announced - self.written
    }

    /// Flushes the sink and returns the number of bytes written. Fails if
    /// fewer frames were written than announced.
    pub fn finish(mut self) -> Result<usize> {
        if self.written != self.announced {
            return Err(TerseError::Consistency(format!(
                "stream header announced {} frames but {} were written",
                self.announced, self.written
            )));
        }
        self.inner.flush()?;
        Ok(self.bytes)
    }
}
