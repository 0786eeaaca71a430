//! Terse: lossless compression for dense arrays of fixed-width integers.
//!
//! Arrays are compressed into [`Frame`]s by cutting the flat element stream
//! into blocks and bit-packing every block at the narrowest width its value
//! range allows. A [`Terse`] container holds an ordered sequence of frames and
//! serializes to a compact self-describing stream.
//!
//! ```no_run
//! use terse_core::{Mode, Terse};
//!
//! let pixels: Vec<u16> = vec![0, 1, 1, 0, 3, 2];
//! let terse = Terse::from_slice(&pixels, &[2, 3], Mode::Default)?;
//! terse.save("frame.terse")?;
//! let back = Terse::load("frame.terse")?;
//! assert_eq!(back.decompress_as::<u16>()?, pixels);
//! # Ok::<(), terse_core::TerseError>(())
//! ```

pub mod bitpack;
pub mod block;
pub mod element;
pub mod error;
pub mod format;
pub mod frame;
mod pool;
pub mod reader;
pub mod settings;
pub mod terse;
pub mod varint;
pub mod writer;

pub use block::Block;
pub use element::{Element, ElementType, TypedArray};
pub use error::{Result, TerseError};
pub use format::{FORMAT_VERSION, MAGIC};
pub use frame::Frame;
pub use reader::Reader;
pub use settings::{Mode, Settings, DEFAULT_BLOCK_SIZE};
pub use terse::{Implicit, Terse};
pub use writer::Writer;
