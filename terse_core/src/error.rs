//! The single error type shared by every layer of the Terse codec.
//!
//! User-facing operations fail fast with one of these kinds and leave the
//! container or frame untouched. `Encoding` and `Range` are raised only inside
//! the block encoder, which always recovers from them through its fallback
//! paths. Seeing them outside `block.rs` means an internal invariant broke.

use thiserror::Error;

use crate::element::ElementType;

#[derive(Error, Debug)]
pub enum TerseError {
    // =========================================================================
    // === Caller errors
    // =========================================================================
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("frame index {index} out of range (number of frames {len})")]
    Index { index: usize, len: usize },

    #[error("unsupported element type tag {0}")]
    UnsupportedType(u32),

    #[error("element type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ElementType,
        found: ElementType,
    },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    // =========================================================================
    // === Encoder-internal errors (always handled by a fallback)
    // =========================================================================
    #[error("bitpack encoding error: offset {0} does not fit in {1} bits")]
    Encoding(u64, u8),

    #[error("small-unsigned block needs {0} bits, above the small ceiling")]
    Range(u8),

    // =========================================================================
    // === Stream / data integrity
    // =========================================================================
    #[error("inconsistent terse data: {0}")]
    Consistency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TerseError {
    /// Maps a short read while decoding a stream to `Consistency`. All other
    /// I/O failures pass through unchanged.
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            TerseError::Consistency(format!("truncated stream while reading {}", what))
        } else {
            TerseError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, TerseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_becomes_consistency_error() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        match TerseError::from_read(eof, "block header") {
            TerseError::Consistency(msg) => assert!(msg.contains("block header")),
            other => panic!("expected Consistency, got {other:?}"),
        }

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            TerseError::from_read(denied, "header"),
            TerseError::Io(_)
        ));
    }
}
