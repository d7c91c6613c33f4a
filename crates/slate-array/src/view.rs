//! Zero-copy views over the mapped backing region.
//!
//! A view never owns or copies array data; it borrows mapped bytes together
//! with enough layout information to hand them to `ndarray`. Reductions,
//! equality, and iteration belong to the numeric-array collaborator, not
//! here.

use ndarray::{ArrayViewD, IxDyn};

use crate::dtype::{DType, Element};
use crate::error::{StoreError, StoreResult};

/// A borrowed window over the store's first axis.
#[derive(Clone, Copy, Debug)]
pub struct ArrayView<'a> {
    bytes: &'a [u8],
    shape: &'a [u64],
    rows: u64,
    dtype: DType,
}

impl<'a> ArrayView<'a> {
    /// `shape` is the store shape; the view covers `rows` of its first axis.
    pub(crate) fn new(bytes: &'a [u8], shape: &'a [u64], rows: u64, dtype: DType) -> Self {
        Self {
            bytes,
            shape,
            rows,
            dtype,
        }
    }

    /// Rows in this view (first-axis extent).
    pub fn len(&self) -> u64 {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Full view shape: `len()` followed by the store's trailing axes.
    pub fn shape(&self) -> Vec<u64> {
        let mut shape = vec![self.rows];
        shape.extend_from_slice(&self.shape[1..]);
        shape
    }

    /// The raw mapped bytes behind this view.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Reinterpret the mapped bytes as a typed slice, without copying.
    pub fn as_slice<T: Element>(&self) -> StoreResult<&'a [T]> {
        if T::DTYPE != self.dtype {
            return Err(StoreError::DtypeMismatch {
                requested: T::DTYPE,
                stored: self.dtype,
            });
        }
        bytemuck::try_cast_slice(self.bytes).map_err(|e| StoreError::CorruptHeader {
            reason: format!("mapped bytes not viewable as {}: {e}", T::DTYPE),
        })
    }

    /// Hand the view to the numeric-array collaborator.
    pub fn to_ndarray<T: Element>(&self) -> StoreResult<ArrayViewD<'a, T>> {
        let slice = self.as_slice::<T>()?;
        let dims: Vec<usize> = self
            .shape()
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<_, _>>()
            .map_err(|_| StoreError::CorruptHeader {
                reason: "view shape exceeds the address space".into(),
            })?;
        ArrayViewD::from_shape(IxDyn(&dims), slice).map_err(|e| StoreError::CorruptHeader {
            reason: format!("view shape disagrees with mapped bytes: {e}"),
        })
    }
}
