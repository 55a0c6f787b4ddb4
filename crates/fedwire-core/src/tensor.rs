//! Tensor — a flat, fixed-length numeric buffer.
//!
//! A Tensor either owns its memory or is a view over memory the caller
//! handed in (model weights owned by another framework, a window into a
//! larger tensor). Views never release what they point at: `clear()` on a
//! view only detaches it.
//!
//! Owned buffers are allocated to their full reserved capacity up front.
//! `size` is the logical extent and may be smaller than the capacity;
//! `append` grows the extent and refuses to run past the capacity.
//!
//! Arithmetic always produces a new owned Tensor and never touches its
//! operands. Binary operations require equal sizes.

use std::fmt;
use std::ops::{Add, Div, Index, Mul};

use crate::element::Element;

/// A Tensor that owns its memory.
pub type OwnedTensor<T> = Tensor<'static, T>;

enum Buffer<'a, T> {
    Unallocated,
    Owned(Vec<T>),
    Borrowed(&'a mut [T]),
}

pub struct Tensor<'a, T: Element> {
    buf: Buffer<'a, T>,
    size: usize,
}

// ── Construction ──────────────────────────────────────────────────────────────

impl<T: Element> Tensor<'static, T> {
    /// A tensor with no backing storage.
    pub fn new() -> Self {
        Self {
            buf: Buffer::Unallocated,
            size: 0,
        }
    }

    /// Reserve `capacity` elements with a logical size of zero.
    /// Fill it with `append`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Buffer::Owned(vec![T::default(); capacity]),
            size: 0,
        }
    }

    pub fn zeros(size: usize) -> Self {
        Self {
            buf: Buffer::Owned(vec![T::default(); size]),
            size,
        }
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        let size = data.len();
        Self {
            buf: Buffer::Owned(data),
            size,
        }
    }
}

impl<'a, T: Element> Tensor<'a, T> {
    /// View caller memory. The tensor's size is the slice length.
    pub fn view(data: &'a mut [T]) -> Self {
        let size = data.len();
        Self {
            buf: Buffer::Borrowed(data),
            size,
        }
    }

    /// View the first `size` elements of caller memory. The rest of the
    /// slice is reserved capacity for `append`.
    pub fn view_prefix(data: &'a mut [T], size: usize) -> Result<Self, TensorError> {
        if size > data.len() {
            return Err(TensorError::OutOfRange {
                start: 0,
                len: size,
                source_len: data.len(),
            });
        }
        Ok(Self {
            buf: Buffer::Borrowed(data),
            size,
        })
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl<'a, T: Element> Tensor<'a, T> {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Reserved capacity in elements. Zero when unallocated.
    pub fn capacity(&self) -> usize {
        match &self.buf {
            Buffer::Unallocated => 0,
            Buffer::Owned(v) => v.len(),
            Buffer::Borrowed(s) => s.len(),
        }
    }

    pub fn is_allocated(&self) -> bool {
        !matches!(self.buf, Buffer::Unallocated)
    }

    pub fn is_view(&self) -> bool {
        matches!(self.buf, Buffer::Borrowed(_))
    }

    /// The logical extent as a slice.
    pub fn data(&self) -> &[T] {
        &self.storage()[..self.size]
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        let size = self.size;
        &mut self.storage_mut()[..size]
    }

    pub fn get(&self, i: usize) -> Option<T> {
        self.data().get(i).copied()
    }

    fn storage(&self) -> &[T] {
        match &self.buf {
            Buffer::Unallocated => &[],
            Buffer::Owned(v) => v.as_slice(),
            Buffer::Borrowed(s) => &s[..],
        }
    }

    fn storage_mut(&mut self) -> &mut [T] {
        match &mut self.buf {
            Buffer::Unallocated => &mut [],
            Buffer::Owned(v) => v.as_mut_slice(),
            Buffer::Borrowed(s) => &mut s[..],
        }
    }
}

// ── Mutation ──────────────────────────────────────────────────────────────────

impl<'a, T: Element> Tensor<'a, T> {
    /// Set every element of the logical extent to zero.
    pub fn zero(&mut self) {
        self.data_mut().fill(T::default());
    }

    /// Drop the backing storage and reset to empty. Owned memory is
    /// released; a view only forgets the memory it was pointing at.
    pub fn clear(&mut self) {
        self.buf = Buffer::Unallocated;
        self.size = 0;
    }

    /// Copy `other` into this tensor.
    ///
    /// An unallocated tensor adopts `other`'s contents and size as a fresh
    /// owned buffer. An allocated tensor keeps its storage and is
    /// overwritten in place, which requires equal sizes.
    pub fn copy(&mut self, other: &Tensor<'_, T>) -> Result<(), TensorError> {
        if !self.is_allocated() {
            if other.is_allocated() {
                self.buf = Buffer::Owned(other.data().to_vec());
                self.size = other.size;
            }
            return Ok(());
        }
        check_sizes(self.size, other.size)?;
        self.data_mut().copy_from_slice(other.data());
        Ok(())
    }

    /// Overwrite this tensor's full extent with `other[start..start + size]`.
    pub fn copy_from(&mut self, other: &Tensor<'_, T>, start: usize) -> Result<(), TensorError> {
        if !self.is_allocated() {
            return Err(TensorError::EmptyBuffer);
        }
        let end = start
            .checked_add(self.size)
            .filter(|end| *end <= other.size)
            .ok_or(TensorError::OutOfRange {
                start,
                len: self.size,
                source_len: other.size,
            })?;
        self.data_mut().copy_from_slice(&other.data()[start..end]);
        Ok(())
    }

    /// Write `other` directly after the current extent and grow the size.
    ///
    /// Bounded by the reserved capacity: a tensor built with
    /// `with_capacity(n)` accepts at most `n` appended elements in total.
    pub fn append(&mut self, other: &Tensor<'_, T>) -> Result<(), TensorError> {
        self.append_slice(other.data())
    }

    /// `append` for elements that are not held in a Tensor.
    pub fn append_slice(&mut self, elements: &[T]) -> Result<(), TensorError> {
        if !self.is_allocated() {
            return Err(TensorError::EmptyBuffer);
        }
        let required = self.size + elements.len();
        let capacity = self.capacity();
        if required > capacity {
            return Err(TensorError::CapacityExceeded { capacity, required });
        }
        let start = self.size;
        self.storage_mut()[start..required].copy_from_slice(elements);
        self.size = required;
        Ok(())
    }
}

// ── Arithmetic ────────────────────────────────────────────────────────────────

impl<'a, T: Element> Tensor<'a, T> {
    pub fn try_add(&self, other: &Tensor<'_, T>) -> Result<OwnedTensor<T>, TensorError> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn try_sub(&self, other: &Tensor<'_, T>) -> Result<OwnedTensor<T>, TensorError> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Fold `other` into `self` as the `count + 1`th contribution to a
    /// running mean, elementwise.
    pub fn try_mean_step(
        &self,
        count: u32,
        other: &Tensor<'_, T>,
    ) -> Result<OwnedTensor<T>, TensorError> {
        self.zip_with(other, |a, b| a.mean_step(count, b))
    }

    /// Detach into an owned copy of the logical extent.
    pub fn to_owned_tensor(&self) -> OwnedTensor<T> {
        if !self.is_allocated() {
            return Tensor::new();
        }
        Tensor::from_vec(self.data().to_vec())
    }

    fn map(&self, f: impl Fn(T) -> T) -> OwnedTensor<T> {
        Tensor::from_vec(self.data().iter().map(|x| f(*x)).collect())
    }

    fn zip_with(
        &self,
        other: &Tensor<'_, T>,
        f: impl Fn(T, T) -> T,
    ) -> Result<OwnedTensor<T>, TensorError> {
        check_sizes(self.size, other.size)?;
        Ok(Tensor::from_vec(
            self.data()
                .iter()
                .zip(other.data())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        ))
    }
}

fn check_sizes(expected: usize, actual: usize) -> Result<(), TensorError> {
    if expected != actual {
        return Err(TensorError::SizeMismatch { expected, actual });
    }
    Ok(())
}

impl<'a, T: Element> Add<T> for &Tensor<'a, T> {
    type Output = OwnedTensor<T>;

    fn add(self, rhs: T) -> Self::Output {
        self.map(|x| x + rhs)
    }
}

impl<'a, T: Element> Mul<T> for &Tensor<'a, T> {
    type Output = OwnedTensor<T>;

    fn mul(self, rhs: T) -> Self::Output {
        self.map(|x| x * rhs)
    }
}

impl<'a, T: Element> Div<T> for &Tensor<'a, T> {
    type Output = OwnedTensor<T>;

    fn div(self, rhs: T) -> Self::Output {
        self.map(|x| x / rhs)
    }
}

// ── Trait impls ───────────────────────────────────────────────────────────────

impl<'a, T: Element> Index<usize> for Tensor<'a, T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.data()[i]
    }
}

impl<'a, 'b, T: Element> PartialEq<Tensor<'b, T>> for Tensor<'a, T> {
    fn eq(&self, other: &Tensor<'b, T>) -> bool {
        self.data() == other.data()
    }
}

/// Cloning always yields an owned tensor. Cloning a view copies the
/// viewed elements rather than aliasing the caller's memory.
impl<'a, T: Element> Clone for Tensor<'a, T> {
    fn clone(&self) -> Self {
        let buf = match &self.buf {
            Buffer::Unallocated => Buffer::Unallocated,
            Buffer::Owned(v) => Buffer::Owned(v.clone()),
            Buffer::Borrowed(_) => Buffer::Owned(self.data().to_vec()),
        };
        Self {
            buf,
            size: self.size,
        }
    }
}

impl<T: Element> Default for Tensor<'static, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> From<Vec<T>> for Tensor<'static, T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}

impl<'a, T: Element> fmt::Debug for Tensor<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const HEAD: usize = 8;
        let data = self.data();
        f.debug_struct("Tensor")
            .field("dtype", &T::DTYPE.name())
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .field("view", &self.is_view())
            .field("head", &&data[..data.len().min(HEAD)])
            .finish()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    #[error("tensor size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("range {start}..{start}+{len} exceeds source of {source_len} elements")]
    OutOfRange {
        start: usize,
        len: usize,
        source_len: usize,
    },

    #[error("tensor has no backing storage")]
    EmptyBuffer,

    #[error("append needs {required} elements but capacity is {capacity}")]
    CapacityExceeded { capacity: usize, required: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
