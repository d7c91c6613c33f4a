//! Read-only access to an existing store.
//!
//! A reader decodes the header once at open time, builds a hash index over
//! the name table, and maps the data region read-only. Every view it hands
//! out borrows the mapping; bytes are only touched (faulted in) when the
//! caller consumes them. Any number of readers may open one path at once,
//! in or across processes.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::backing::{BackingFile, StorePaths};
use crate::dtype::DType;
use crate::error::{StoreError, StoreResult};
use crate::layout::{offset_of, Descriptor, IndexEntry};
use crate::view::ArrayView;

/// Decode just the header/index record of the store at `base`.
pub fn read_header(base: &Path) -> StoreResult<Descriptor> {
    let paths = StorePaths::from_base(base);
    let bytes = std::fs::read(&paths.index).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(paths.index.clone()),
        _ => StoreError::Io(e),
    })?;
    Descriptor::from_bytes(&bytes)
}

/// A store opened for reading.
#[derive(Debug)]
pub struct ArrayReader {
    descriptor: Descriptor,
    by_name: HashMap<String, (u64, u64)>,
    /// `None` when the committed region is empty.
    mmap: Option<Mmap>,
}

impl ArrayReader {
    /// Open the store at `base`.
    pub fn open(base: &Path) -> StoreResult<Self> {
        let paths = StorePaths::from_base(base);
        let descriptor = read_header(base)?;

        if !paths.data.exists() {
            return Err(StoreError::NotFound(paths.data));
        }
        let mmap = BackingFile::open_ro(&paths.data)?;

        let committed_bytes = descriptor
            .length()
            .checked_mul(descriptor.row_stride())
            .ok_or_else(|| StoreError::CorruptHeader {
                reason: "committed region overflows u64".into(),
            })?;
        let mapped = mmap.as_ref().map_or(0, |m| m.len() as u64);
        if mapped < committed_bytes {
            return Err(StoreError::CorruptHeader {
                reason: format!(
                    "data file holds {mapped} bytes, committed region needs {committed_bytes}"
                ),
            });
        }

        let by_name = descriptor
            .entries
            .iter()
            .map(|e| (e.name.clone(), (e.start, e.end)))
            .collect();
        Ok(Self {
            descriptor,
            by_name,
            mmap,
        })
    }

    /// Zero-copy view over `[start, end)` of the first axis.
    ///
    /// An empty range at the boundary (`get_slice(n, n)` on a store of
    /// length `n`) is a valid empty view.
    pub fn get_slice(&self, start: u64, end: u64) -> StoreResult<ArrayView<'_>> {
        if start > end || end > self.len() {
            return Err(StoreError::OutOfBounds {
                start,
                end,
                len: self.len(),
            });
        }
        Ok(self.slice_view(start, end))
    }

    /// View over a named entry's committed range.
    pub fn get_by_name(&self, name: &str) -> StoreResult<ArrayView<'_>> {
        let &(start, end) = self
            .by_name
            .get(name)
            .ok_or_else(|| StoreError::NameNotFound(name.to_string()))?;
        self.get_slice(start, end)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// The entire committed region as one view.
    pub fn full_view(&self) -> ArrayView<'_> {
        self.slice_view(0, self.len())
    }

    /// Index entries as `(name, (start, end))`, in persisted order.
    ///
    /// The iterator is lazy and can be restarted by calling again.
    pub fn indices(&self) -> impl Iterator<Item = (&str, (u64, u64))> + '_ {
        self.descriptor
            .entries
            .iter()
            .map(|e| (e.name.as_str(), (e.start, e.end)))
    }

    /// Raw index entries, in persisted order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.descriptor.entries
    }

    pub fn index_len(&self) -> usize {
        self.descriptor.entries.len()
    }

    /// Committed first-axis length.
    pub fn len(&self) -> u64 {
        self.descriptor.length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full store shape; the first axis is the committed length.
    pub fn shape(&self) -> &[u64] {
        &self.descriptor.shape
    }

    pub fn dtype(&self) -> DType {
        self.descriptor.dtype
    }

    /// Bounds already checked by the caller.
    fn slice_view(&self, start: u64, end: u64) -> ArrayView<'_> {
        let elem = self.descriptor.dtype.size();
        let from = offset_of(start, &self.descriptor.shape, elem) as usize;
        let to = offset_of(end, &self.descriptor.shape, elem) as usize;
        let bytes = match &self.mmap {
            Some(m) => &m[from..to],
            None => &[],
        };
        ArrayView::new(bytes, &self.descriptor.shape, end - start, self.descriptor.dtype)
    }
}
