//! Chunk filter adapter for array file formats.
//!
//! The host hands over one dataset chunk at a time as raw host-native bytes
//! plus a numeric type code. [`compress`] turns the chunk into Terse stream
//! bytes and [`decompress`] reverses it. Both calls are stateless.
//!
//! A chunk larger than [`DEFAULT_CHUNK_ELEMENTS`] is split into equal flat
//! frames plus a remainder, written as two containers back to back:
//!
//! ```text
//! [CONTAINER: n frames of chunk_elements each] [CONTAINER: 0 or 1 remainder frame]
//! ```
//!
//! The C entry points live in [`ffi`].

use std::borrow::Cow;

use terse_core::{Element, ElementType, Mode, Result, Settings, Terse, TerseError, TypedArray};

pub mod ffi;

/// Filter id registered with the host.
pub const TERSE_FILTER_ID: u32 = 32029;

/// Filter name registered with the host.
pub const FILTER_NAME: &str = "TERSE";

/// Largest number of elements compressed as a single frame.
pub const DEFAULT_CHUNK_ELEMENTS: usize = 1 << 18;

/// Per-call options of the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOptions {
    pub mode: Mode,
    /// Elements per frame; 0 keeps the whole chunk in one frame.
    pub chunk_elements: usize,
    pub settings: Settings,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Default,
            chunk_elements: DEFAULT_CHUNK_ELEMENTS,
            settings: Settings::default(),
        }
    }
}

/// Maps a host type code to an element type. The codes match the stream's
/// element type tags.
pub fn element_type_for_code(type_code: u32) -> Result<ElementType> {
    ElementType::from_tag(type_code)
}

/// Whether the filter can run on a chunk of `dims` elements of `type_code`.
/// Never fails: unsupported input simply answers `false`.
pub fn can_apply(type_code: u32, dims: &[usize]) -> bool {
    element_type_for_code(type_code).is_ok() && !dims.is_empty() && !dims.contains(&0)
}

fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Views `raw` as elements without copying when it is suitably aligned.
fn typed<T: Element>(raw: &[u8]) -> Result<Cow<'_, [T]>> {
    if raw.len() % T::TYPE.width() != 0 {
        return Err(TerseError::Shape(format!(
            "{} bytes is not a whole number of {} elements",
            raw.len(),
            T::TYPE
        )));
    }
    match bytemuck::try_cast_slice::<u8, T>(raw) {
        Ok(values) => Ok(Cow::Borrowed(values)),
        Err(_) => TypedArray::from_ne_bytes(T::TYPE, raw)?
            .into_vec::<T>()
            .map(Cow::Owned),
    }
}

/// Compresses one host chunk with default settings.
pub fn compress(raw: &[u8], dims: &[usize], type_code: u32, mode: Mode) -> Result<Vec<u8>> {
    compress_with(
        raw,
        dims,
        type_code,
        &FilterOptions {
            mode,
            ..FilterOptions::default()
        },
    )
}

/// Compresses one host chunk. An empty `dims` skips the shape check.
pub fn compress_with(
    raw: &[u8],
    dims: &[usize],
    type_code: u32,
    options: &FilterOptions,
) -> Result<Vec<u8>> {
    let ty = element_type_for_code(type_code)?;
    let len = raw.len() / ty.width();
    if !dims.is_empty() && element_count(dims) != Some(len) {
        return Err(TerseError::Shape(format!(
            "chunk dims {:?} do not describe {} elements",
            dims, len
        )));
    }
    terse_core::with_element_type!(ty, T => {
        let values = typed::<T>(raw)?;
        encode_chunks::<T>(&values, options)
    })
}

fn encode_chunks<T: Element>(values: &[T], options: &FilterOptions) -> Result<Vec<u8>> {
    let chunk = match options.chunk_elements {
        0 => values.len().max(1),
        n => n,
    };
    let mut chunks = Terse::with_settings(options.settings)?;
    let mut pos = 0;
    while pos + chunk < values.len() {
        chunks.append(&values[pos..pos + chunk], &[chunk], options.mode)?;
        pos += chunk;
    }
    let mut rest = Terse::with_settings(options.settings)?;
    if pos < values.len() {
        rest.append(&values[pos..], &[values.len() - pos], options.mode)?;
    }

    let mut out = Vec::with_capacity(chunks.file_size() + rest.file_size());
    chunks.write(&mut out)?;
    rest.write(&mut out)?;
    log::trace!(
        "filter compressed {} {} values into {} frames, {} bytes",
        values.len(),
        T::TYPE,
        chunks.number_of_frames() + rest.number_of_frames(),
        out.len()
    );
    Ok(out)
}

fn check_type(terse: &Terse, ty: ElementType) -> Result<()> {
    match terse.element_type() {
        Some(found) if found != ty => Err(TerseError::TypeMismatch { expected: ty, found }),
        _ => Ok(()),
    }
}

/// Decompresses a chunk written by [`compress`] back into host-native bytes.
/// A non-empty `dims` must match the decoded element count.
pub fn decompress(compressed: &[u8], dims: &[usize], type_code: u32) -> Result<Vec<u8>> {
    let ty = element_type_for_code(type_code)?;
    let mut source = compressed;
    // compress always writes both containers; a missing remainder is truncation
    let chunks = Terse::read(&mut source)?;
    let rest = Terse::read(&mut source)?;
    if !source.is_empty() {
        log::debug!("ignoring {} bytes after the terse chunk", source.len());
    }
    check_type(&chunks, ty)?;
    check_type(&rest, ty)?;

    let mut out = TypedArray::empty(ty);
    for part in [&chunks, &rest] {
        if !part.is_empty() {
            out.extend_from(part.decompress_all()?)?;
        }
    }
    if !dims.is_empty() && element_count(dims) != Some(out.len()) {
        return Err(TerseError::Consistency(format!(
            "chunk decoded to {} elements, dims {:?} expected",
            out.len(),
            dims
        )));
    }
    Ok(out.to_ne_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_apply_rejects_unknown_types_and_empty_dims() {
        assert!(can_apply(1, &[512, 512]));
        assert!(can_apply(7, &[10]));
        assert!(!can_apply(8, &[512, 512]));
        assert!(!can_apply(1, &[]));
        assert!(!can_apply(1, &[512, 0]));
    }

    #[test]
    fn misaligned_input_is_copied() {
        let values: Vec<u32> = (0..100).collect();
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(bytemuck::cast_slice(&values));
        let view = typed::<u32>(&bytes[1..]).unwrap();
        assert_eq!(&*view, values.as_slice());
        assert!(typed::<u32>(&bytes[..7]).is_err());
    }
}
