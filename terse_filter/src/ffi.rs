//! C-callable entry points for the host's filter plugin loader.
//!
//! The host contract has no rich error channel: every entry point reports
//! failure as a zero return and logs the cause with `log::error!`. Panics
//! never cross the boundary.

use std::ffi::{c_char, c_int, c_uint};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use terse_core::{Mode, Result, TerseError};

use crate::{can_apply, compress, decompress, FILTER_NAME, TERSE_FILTER_ID};

/// `flags` bit selecting decompression.
pub const H5Z_FLAG_REVERSE: c_uint = 0x0100;

/// Version of the filter class layout below.
pub const FILTER_CLASS_VERSION: c_int = 1;

/// Output buffer handed to the host. Release it with [`terse_buffer_free`].
#[repr(C)]
#[derive(Debug)]
pub struct TerseBuffer {
    pub data: *mut u8,
    pub len: usize,
    pub capacity: usize,
}

impl TerseBuffer {
    const EMPTY: TerseBuffer = TerseBuffer {
        data: std::ptr::null_mut(),
        len: 0,
        capacity: 0,
    };

    fn from_vec(bytes: Vec<u8>) -> Self {
        let mut bytes = std::mem::ManuallyDrop::new(bytes);
        TerseBuffer {
            data: bytes.as_mut_ptr(),
            len: bytes.len(),
            capacity: bytes.capacity(),
        }
    }
}

pub type FilterFn = unsafe extern "C" fn(
    flags: c_uint,
    cd_nelmts: usize,
    cd_values: *const c_uint,
    nbytes: usize,
    input: *const u8,
    out: *mut TerseBuffer,
) -> usize;

pub type CanApplyFn = unsafe extern "C" fn(type_code: c_uint, ndims: usize, dims: *const usize) -> c_int;

/// Static description of the filter, laid out for the host loader.
#[repr(C)]
#[derive(Debug)]
pub struct FilterClass {
    pub version: c_int,
    pub id: c_uint,
    pub encoder_present: c_uint,
    pub decoder_present: c_uint,
    pub name: *const c_char,
    pub can_apply: Option<CanApplyFn>,
    pub filter: Option<FilterFn>,
}

// The only pointer is to a 'static C string.
unsafe impl Sync for FilterClass {}

static FILTER_CLASS: FilterClass = FilterClass {
    version: FILTER_CLASS_VERSION,
    id: TERSE_FILTER_ID,
    encoder_present: 1,
    decoder_present: 1,
    name: c"TERSE".as_ptr(),
    can_apply: Some(terse_can_apply),
    filter: Some(terse_filter),
};

static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Borrows `len` elements at `ptr`, treating a null pointer as empty only when
/// `len == 0`.
unsafe fn slice_arg<'a, T>(ptr: *const T, len: usize, what: &str) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(TerseError::InvalidSetting(format!(
            "null {} pointer with length {}",
            what, len
        )));
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

fn run_filter(flags: c_uint, cd_values: &[c_uint], input: &[u8]) -> Result<Vec<u8>> {
    let Some(&type_code) = cd_values.first() else {
        return Err(TerseError::InvalidSetting(
            "filter called without a type code".to_string(),
        ));
    };
    if flags & H5Z_FLAG_REVERSE != 0 {
        decompress(input, &[], type_code)
    } else if input.is_empty() {
        // a zero-length result reads as failure on the way back
        Err(TerseError::Shape(
            "the C filter cannot round-trip an empty chunk".to_string(),
        ))
    } else {
        let mode = match cd_values.get(1) {
            None => Mode::Default,
            Some(&tag) => Mode::from_tag(tag)
                .ok_or_else(|| TerseError::InvalidSetting(format!("unknown mode tag {}", tag)))?,
        };
        compress(input, &[], type_code, mode)
    }
}

/// Compresses or decompresses one chunk.
///
/// `cd_values[0]` is the type code, the optional `cd_values[1]` the mode tag.
/// On success `*out` receives a buffer owned by the caller and the output
/// length is returned; on failure `*out` is left empty and 0 is returned.
/// Since 0 doubles as the failure status, empty chunks are rejected when
/// compressing. The Rust [`compress`](crate::compress) API accepts them.
///
/// # Safety
/// `cd_values` must point to `cd_nelmts` values, `input` to `nbytes` bytes,
/// and `out` to writable memory for one [`TerseBuffer`].
#[no_mangle]
pub unsafe extern "C" fn terse_filter(
    flags: c_uint,
    cd_nelmts: usize,
    cd_values: *const c_uint,
    nbytes: usize,
    input: *const u8,
    out: *mut TerseBuffer,
) -> usize {
    if out.is_null() {
        log::error!("terse filter called without an output buffer");
        return 0;
    }
    *out = TerseBuffer::EMPTY;

    let result = catch_unwind(AssertUnwindSafe(|| {
        let cd_values = slice_arg(cd_values, cd_nelmts, "cd_values")?;
        let input = slice_arg(input, nbytes, "input")?;
        run_filter(flags, cd_values, input)
    }));
    match result {
        Ok(Ok(bytes)) => {
            let len = bytes.len();
            *out = TerseBuffer::from_vec(bytes);
            len
        }
        Ok(Err(e)) => {
            log::error!("terse filter failed: {}", e);
            0
        }
        Err(_) => {
            log::error!("terse filter panicked");
            0
        }
    }
}

/// Releases a buffer produced by [`terse_filter`]. Empty buffers are ignored.
///
/// # Safety
/// `buffer` must be null or point to a buffer filled by `terse_filter` that
/// was not released before.
#[no_mangle]
pub unsafe extern "C" fn terse_buffer_free(buffer: *mut TerseBuffer) {
    if buffer.is_null() {
        return;
    }
    let buf = std::mem::replace(&mut *buffer, TerseBuffer::EMPTY);
    if !buf.data.is_null() {
        drop(Vec::from_raw_parts(buf.data, buf.len, buf.capacity));
    }
}

/// Returns 1 when the filter applies to `dims` of `type_code`, 0 otherwise.
///
/// # Safety
/// `dims` must point to `ndims` values.
#[no_mangle]
pub unsafe extern "C" fn terse_can_apply(type_code: c_uint, ndims: usize, dims: *const usize) -> c_int {
    match slice_arg(dims, ndims, "dims") {
        Ok(dims) => c_int::from(can_apply(type_code, dims)),
        Err(_) => 0,
    }
}

/// Registers the filter. Returns 1 on success; registering twice is harmless.
#[no_mangle]
pub extern "C" fn register_terse_filter() -> c_int {
    if !REGISTERED.swap(true, Ordering::SeqCst) {
        log::debug!("registered filter {} ({})", FILTER_NAME, TERSE_FILTER_ID);
    }
    1
}

/// Whether [`register_terse_filter`] has been called in this process.
pub fn is_registered() -> bool {
    REGISTERED.load(Ordering::SeqCst)
}

/// Static filter descriptor for the host plugin loader.
#[no_mangle]
pub extern "C" fn terse_plugin_info() -> *const FilterClass {
    &FILTER_CLASS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_info_describes_the_filter() {
        let info = unsafe { &*terse_plugin_info() };
        assert_eq!(info.id, 32029);
        let name = unsafe { std::ffi::CStr::from_ptr(info.name) };
        assert_eq!(name.to_str().unwrap(), FILTER_NAME);
        assert!(info.filter.is_some());
    }

    #[test]
    fn register_reports_success() {
        assert_eq!(register_terse_filter(), 1);
        assert_eq!(register_terse_filter(), 1);
        assert!(is_registered());
    }

    #[test]
    fn filter_round_trips_through_the_c_entry_point() {
        let values: Vec<i16> = (0..1000).map(|i| (i % 50) - 25).collect();
        let raw: &[u8] = bytemuck::cast_slice(&values);
        let cd = [0 as c_uint, Mode::Signed.tag() as c_uint];

        let mut packed = TerseBuffer::EMPTY;
        let n = unsafe { terse_filter(0, cd.len(), cd.as_ptr(), raw.len(), raw.as_ptr(), &mut packed) };
        assert!(n > 0 && n < raw.len());

        let mut unpacked = TerseBuffer::EMPTY;
        let m = unsafe {
            terse_filter(H5Z_FLAG_REVERSE, 1, cd.as_ptr(), packed.len, packed.data, &mut unpacked)
        };
        assert_eq!(m, raw.len());
        let back = unsafe { std::slice::from_raw_parts(unpacked.data, unpacked.len) };
        assert_eq!(back, raw);

        unsafe {
            terse_buffer_free(&mut packed);
            terse_buffer_free(&mut unpacked);
        }
        assert!(packed.data.is_null());
    }

    #[test]
    fn filter_reports_failure_as_zero() {
        let cd = [99 as c_uint];
        let mut out = TerseBuffer::EMPTY;
        let n = unsafe { terse_filter(0, 1, cd.as_ptr(), 4, [1u8, 2, 3, 4].as_ptr(), &mut out) };
        assert_eq!(n, 0);
        assert!(out.data.is_null());
        assert_eq!(unsafe { terse_filter(0, 0, std::ptr::null(), 0, std::ptr::null(), &mut out) }, 0);

        let dims = [64usize, 64];
        assert_eq!(unsafe { terse_can_apply(3, 2, dims.as_ptr()) }, 1);
        assert_eq!(unsafe { terse_can_apply(42, 2, dims.as_ptr()) }, 0);
        assert_eq!(unsafe { terse_can_apply(3, 2, std::ptr::null()) }, 0);
    }

    #[test]
    fn empty_chunk_is_rejected_at_the_c_boundary() {
        let cd = [3 as c_uint];
        let mut out = TerseBuffer::EMPTY;
        let empty: [u8; 0] = [];
        let n = unsafe { terse_filter(0, 1, cd.as_ptr(), 0, empty.as_ptr(), &mut out) };
        assert_eq!(n, 0);
        assert!(out.data.is_null());
        assert!(matches!(run_filter(0, &cd, &[]), Err(TerseError::Shape(_))));
    }
}
