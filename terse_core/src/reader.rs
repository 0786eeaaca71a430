use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;
use crate::format::StreamHeader;
use crate::frame::Frame;

/// Sequential reader for Terse streams.
///
/// # Open sequence
/// 1. Read the stream header (magic check, version, frame count).
/// 2. Hand out frames one at a time with [`next_frame`](Reader::next_frame).
///
/// The reader consumes exactly the bytes of one container and never reads
/// ahead, so a second container written right after the first can be read
/// from the same source with a fresh `Reader`.
pub struct Reader<R: Read> {
    inner: R,
    header: StreamHeader,
    remaining: usize,
}

impl Reader<BufReader<File>> {
    /// Open a Terse file and read its stream header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Reader::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> Reader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let header = StreamHeader::read_from(&mut inner)?;
        Ok(Self {
            inner,
            remaining: header.frame_count,
            header,
        })
    }

    /// Total number of frames announced by the header.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.header.frame_count
    }

    /// Frames not yet read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Reads the next frame, or `None` once every announced frame was read.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let frame = Frame::read_from(&mut self.inner)?;
        self.remaining -= 1;
        Ok(Some(frame))
    }

    /// Skips up to `count` frames without decompressing them.
    pub fn skip_frames(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            if self.next_frame()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Returns the underlying source, positioned after the last frame read.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for Reader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
