//! Element types — the numeric types a Tensor can carry on the wire.
//!
//! Every element type has a one-byte dtype tag that travels in the chunk
//! header, and a fixed little-endian encoding. A receiver only accepts
//! chunks whose tag matches its own element type.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Sub};

use bytes::{Buf, BufMut};

use crate::wire::WireError;

/// Wire tag for the element type of a chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DType {
    F32 = 0x01,
    F64 = 0x02,
    I32 = 0x03,
    I64 = 0x04,
}

impl DType {
    /// Encoded width of one element, in bytes.
    pub const fn width(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::I64 => "i64",
        }
    }
}

impl TryFrom<u8> for DType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(DType::F32),
            0x02 => Ok(DType::F64),
            0x03 => Ok(DType::I32),
            0x04 => Ok(DType::I64),
            other => Err(WireError::UnknownDType(other)),
        }
    }
}

impl From<DType> for u8 {
    fn from(d: DType) -> u8 {
        d as u8
    }
}

/// A numeric type that can live in a Tensor and cross the wire.
///
/// `Default` is the type's zero. `mean_step` folds one more contribution
/// into a running mean.
pub trait Element:
    Copy
    + Default
    + PartialEq
    + Debug
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    const DTYPE: DType;

    /// `(self * count + next) / (count + 1)`. Integer types compute it in
    /// i128 and truncate toward zero, so it never overflows.
    fn mean_step(self, count: u32, next: Self) -> Self;

    fn put_le<B: BufMut>(self, buf: &mut B);

    /// Read one element. The caller guarantees `buf` holds at least
    /// `DTYPE.width()` bytes.
    fn get_le<B: Buf>(buf: &mut B) -> Self;
}

macro_rules! impl_element {
    (float $t:ty, $dtype:expr, $put:ident, $get:ident) => {
        impl_element!(@impl $t, $dtype, $put, $get, |current: $t, count: u32, next: $t| {
            let n = count as $t;
            (current * n + next) / (n + 1.0)
        });
    };
    (int $t:ty, $dtype:expr, $put:ident, $get:ident) => {
        impl_element!(@impl $t, $dtype, $put, $get, |current: $t, count: u32, next: $t| {
            let n = i128::from(count);
            // a mean of in-range values is itself in range
            ((i128::from(current) * n + i128::from(next)) / (n + 1)) as $t
        });
    };
    (@impl $t:ty, $dtype:expr, $put:ident, $get:ident, $mean:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            fn mean_step(self, count: u32, next: Self) -> Self {
                ($mean)(self, count, next)
            }

            fn put_le<B: BufMut>(self, buf: &mut B) {
                buf.$put(self);
            }

            fn get_le<B: Buf>(buf: &mut B) -> Self {
                buf.$get()
            }
        }
    };
}

impl_element!(float f32, DType::F32, put_f32_le, get_f32_le);
impl_element!(float f64, DType::F64, put_f64_le, get_f64_le);
impl_element!(int i32, DType::I32, put_i32_le, get_i32_le);
impl_element!(int i64, DType::I64, put_i64_le, get_i64_le);
