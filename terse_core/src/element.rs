//! The closed set of fixed-width integer kinds Terse can encode.
//!
//! `ElementType` is the runtime tag (one byte on the wire, one `u32` at the
//! plugin boundary). `Element` is the compile-time side, implemented for the
//! eight primitive integers. `TypedArray` owns decompressed data of any of the
//! eight kinds, so type dispatch happens once per frame rather than per value.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TerseError};

/// Element type tags. The numeric codes are shared by the stream format and
/// the plugin adapter; the first six match the codes used by existing filter
/// pipelines, 64-bit kinds follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int8,
    UInt8,
    Int64,
    UInt64,
}

impl ElementType {
    pub const ALL: [ElementType; 8] = [
        ElementType::Int8,
        ElementType::UInt8,
        ElementType::Int16,
        ElementType::UInt16,
        ElementType::Int32,
        ElementType::UInt32,
        ElementType::Int64,
        ElementType::UInt64,
    ];

    pub fn tag(self) -> u8 {
        match self {
            ElementType::Int16 => 0,
            ElementType::UInt16 => 1,
            ElementType::Int32 => 2,
            ElementType::UInt32 => 3,
            ElementType::Int8 => 4,
            ElementType::UInt8 => 5,
            ElementType::Int64 => 6,
            ElementType::UInt64 => 7,
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(ElementType::Int16),
            1 => Ok(ElementType::UInt16),
            2 => Ok(ElementType::Int32),
            3 => Ok(ElementType::UInt32),
            4 => Ok(ElementType::Int8),
            5 => Ok(ElementType::UInt8),
            6 => Ok(ElementType::Int64),
            7 => Ok(ElementType::UInt64),
            other => Err(TerseError::UnsupportedType(other)),
        }
    }

    /// Raw element width in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 => 4,
            ElementType::Int64 | ElementType::UInt64 => 8,
        }
    }

    pub fn bits(self) -> u8 {
        (self.width() * 8) as u8
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ElementType::Int8 | ElementType::Int16 | ElementType::Int32 | ElementType::Int64
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Int8 => "i8",
            ElementType::UInt8 => "u8",
            ElementType::Int16 => "i16",
            ElementType::UInt16 => "u16",
            ElementType::Int32 => "i32",
            ElementType::UInt32 => "u32",
            ElementType::Int64 => "i64",
            ElementType::UInt64 => "u64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementType {
    type Err = TerseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i8" | "int8" => Ok(ElementType::Int8),
            "u8" | "uint8" => Ok(ElementType::UInt8),
            "i16" | "int16" => Ok(ElementType::Int16),
            "u16" | "uint16" => Ok(ElementType::UInt16),
            "i32" | "int32" => Ok(ElementType::Int32),
            "u32" | "uint32" => Ok(ElementType::UInt32),
            "i64" | "int64" => Ok(ElementType::Int64),
            "u64" | "uint64" => Ok(ElementType::UInt64),
            other => Err(TerseError::InvalidSetting(format!(
                "unknown element type '{}'. Valid options: i8, u8, i16, u16, i32, u32, i64, u64",
                other
            ))),
        }
    }
}

/// A primitive integer that can be stored in a Terse frame.
///
/// Values travel through the encoder as 64-bit words. The unsigned view
/// zero-extends the raw bit pattern and the signed view sign-extends it.
/// `from_word` truncates back to the element width, so
/// `from_word(unsigned_word(x)) == from_word(signed_word(x) as u64) == x`.
pub trait Element: Copy + Send + Sync + PartialEq + fmt::Debug + bytemuck::Pod + 'static {
    const TYPE: ElementType;

    fn unsigned_word(self) -> u64;
    fn signed_word(self) -> i64;
    fn from_word(word: u64) -> Self;

    fn wrap(values: Vec<Self>) -> TypedArray;
    fn view(array: &TypedArray) -> Option<&[Self]>;
    fn unwrap(array: TypedArray) -> std::result::Result<Vec<Self>, TypedArray>;
}

/// Owned, decompressed data of one of the eight element kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedArray {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
}

/// Runs `$body` with `$v` bound to the inner `Vec<T>` (or a reference to it,
/// depending on how `$array` is passed) of a `TypedArray`.
#[macro_export]
macro_rules! with_typed_array {
    ($array:expr, $v:ident => $body:expr) => {
        match $array {
            $crate::TypedArray::Int8($v) => $body,
            $crate::TypedArray::UInt8($v) => $body,
            $crate::TypedArray::Int16($v) => $body,
            $crate::TypedArray::UInt16($v) => $body,
            $crate::TypedArray::Int32($v) => $body,
            $crate::TypedArray::UInt32($v) => $body,
            $crate::TypedArray::Int64($v) => $body,
            $crate::TypedArray::UInt64($v) => $body,
        }
    };
}

/// Runs `$body` with the type alias `$t` bound to the primitive of `$ty`.
#[macro_export]
macro_rules! with_element_type {
    ($ty:expr, $t:ident => $body:expr) => {
        match $ty {
            $crate::ElementType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::ElementType::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::ElementType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::ElementType::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::ElementType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::ElementType::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::ElementType::Int64 => {
                type $t = i64;
                $body
            }
            $crate::ElementType::UInt64 => {
                type $t = u64;
                $body
            }
        }
    };
}

macro_rules! impl_element {
    ($t:ty, $ut:ty, $st:ty, $variant:ident) => {
        impl Element for $t {
            const TYPE: ElementType = ElementType::$variant;

            #[inline]
            fn unsigned_word(self) -> u64 {
                self as $ut as u64
            }

            #[inline]
            fn signed_word(self) -> i64 {
                self as $st as i64
            }

            #[inline]
            fn from_word(word: u64) -> Self {
                word as $t
            }

            fn wrap(values: Vec<Self>) -> TypedArray {
                TypedArray::$variant(values)
            }

            fn view(array: &TypedArray) -> Option<&[Self]> {
                match array {
                    TypedArray::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn unwrap(array: TypedArray) -> std::result::Result<Vec<Self>, TypedArray> {
                match array {
                    TypedArray::$variant(v) => Ok(v),
                    other => Err(other),
                }
            }
        }

        impl From<Vec<$t>> for TypedArray {
            fn from(values: Vec<$t>) -> Self {
                TypedArray::$variant(values)
            }
        }
    };
}

impl_element!(i8, u8, i8, Int8);
impl_element!(u8, u8, i8, UInt8);
impl_element!(i16, u16, i16, Int16);
impl_element!(u16, u16, i16, UInt16);
impl_element!(i32, u32, i32, Int32);
impl_element!(u32, u32, i32, UInt32);
impl_element!(i64, u64, i64, Int64);
impl_element!(u64, u64, i64, UInt64);

impl TypedArray {
    pub fn element_type(&self) -> ElementType {
        match self {
            TypedArray::Int8(_) => ElementType::Int8,
            TypedArray::UInt8(_) => ElementType::UInt8,
            TypedArray::Int16(_) => ElementType::Int16,
            TypedArray::UInt16(_) => ElementType::UInt16,
            TypedArray::Int32(_) => ElementType::Int32,
            TypedArray::UInt32(_) => ElementType::UInt32,
            TypedArray::Int64(_) => ElementType::Int64,
            TypedArray::UInt64(_) => ElementType::UInt64,
        }
    }

    pub fn len(&self) -> usize {
        with_typed_array!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty array of the given kind.
    pub fn empty(ty: ElementType) -> Self {
        with_element_type!(ty, T => <T as Element>::wrap(Vec::new()))
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(self)
    }

    pub fn into_vec<T: Element>(self) -> Result<Vec<T>> {
        T::unwrap(self).map_err(|other| TerseError::TypeMismatch {
            expected: other.element_type(),
            found: T::TYPE,
        })
    }

    /// Reinterprets host-native bytes as elements of `ty`. The input need not
    /// be aligned.
    pub fn from_ne_bytes(ty: ElementType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % ty.width() != 0 {
            return Err(TerseError::Shape(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                ty
            )));
        }
        Ok(with_element_type!(ty, T => <T as Element>::wrap(collect_ne::<T>(bytes))))
    }

    /// Host-native byte image of the elements.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        with_typed_array!(self, v => bytemuck::cast_slice(v.as_slice()).to_vec())
    }

    /// Appends `other` to `self`; both must hold the same element kind.
    pub fn extend_from(&mut self, other: TypedArray) -> Result<()> {
        with_typed_array!(self, v => append_array(v, other))
    }
}

fn collect_ne<T: Element>(bytes: &[u8]) -> Vec<T> {
    let mut out = vec![T::from_word(0); bytes.len() / std::mem::size_of::<T>()];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    out
}

fn append_array<T: Element>(values: &mut Vec<T>, other: TypedArray) -> Result<()> {
    let found = other.element_type();
    let tail = T::unwrap(other).map_err(|_| TerseError::TypeMismatch {
        expected: T::TYPE,
        found,
    })?;
    values.extend_from_slice(&tail);
    Ok(())
}
