use std::path::PathBuf;

use thiserror::Error;

use crate::dtype::DType;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported format version: {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("corrupt header: {reason}")]
    CorruptHeader { reason: String },

    #[error(
        "shape/dtype mismatch: store is {stored_dtype} {stored_shape:?}, \
         requested {requested_dtype} {requested_shape:?}"
    )]
    ShapeDtypeMismatch {
        stored_dtype: DType,
        stored_shape: Vec<u64>,
        requested_dtype: DType,
        requested_shape: Vec<u64>,
    },

    #[error("chunk trailing shape {actual:?} does not match store trailing shape {expected:?}")]
    ShapeMismatch { expected: Vec<u64>, actual: Vec<u64> },

    #[error("range [{start}, {end}) for \"{name}\" overlaps committed entry \"{existing}\"")]
    RangeOverlap {
        name: String,
        start: u64,
        end: u64,
        existing: String,
    },

    #[error("entry \"{0}\" is already committed with a different range")]
    DuplicateName(String),

    #[error("slice [{start}, {end}) out of bounds for first-axis length {len}")]
    OutOfBounds { start: u64, end: u64, len: u64 },

    #[error("no entry named \"{0}\"")]
    NameNotFound(String),

    #[error("operation on a closed writer")]
    Closed,

    #[error("store not found: {0}")]
    NotFound(PathBuf),

    #[error("element type mismatch: requested {requested}, store holds {stored}")]
    DtypeMismatch { requested: DType, stored: DType },

    #[error("invalid store shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<u64>, reason: String },

    #[error("capacity overflows the addressable range: {rows} rows of {row_stride} bytes")]
    CapacityOverflow { rows: u64, row_stride: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
