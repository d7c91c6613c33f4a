//! Backing file ownership: allocation, zero-filled growth, mappings.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use crate::error::{StoreError, StoreResult};

/// Sibling files a store path resolves to.
///
/// The base path's extension is replaced, so `vectors`, `vectors.arr`, and
/// `vectors.idx` all name the same store.
#[derive(Clone, Debug)]
pub struct StorePaths {
    /// Flat data region (`.arr`).
    pub data: PathBuf,
    /// Header/index record (`.idx`).
    pub index: PathBuf,
}

impl StorePaths {
    pub fn from_base(base: &Path) -> Self {
        Self {
            data: base.with_extension("arr"),
            index: base.with_extension("idx"),
        }
    }
}

/// Owns the data file and its mutable mapping.
///
/// The mapping is absent while the allocation is zero bytes: an empty file
/// cannot be mapped, and an empty store is valid.
#[derive(Debug)]
pub struct BackingFile {
    file: File,
    mmap: Option<MmapMut>,
    path: PathBuf,
    row_stride: u64,
    capacity_rows: u64,
}

impl BackingFile {
    /// Create the data file sized for `rows`, truncating any existing file.
    pub fn create(path: &Path, rows: u64, row_stride: u64) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut backing = Self {
            file,
            mmap: None,
            path: path.to_path_buf(),
            row_stride,
            capacity_rows: 0,
        };
        backing.ensure_capacity(rows)?;
        Ok(backing)
    }

    /// Open an existing data file read-write, adopting its allocation.
    pub fn open_rw(path: &Path, row_stride: u64) -> StoreResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let capacity_rows = if row_stride == 0 { 0 } else { len / row_stride };
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { MmapMut::map_mut(&file)? })
        };
        Ok(Self {
            file,
            mmap,
            path: path.to_path_buf(),
            row_stride,
            capacity_rows,
        })
    }

    /// Map an existing data file read-only. `None` when the file is empty.
    pub fn open_ro(path: &Path) -> StoreResult<Option<Mmap>> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        Ok(Some(unsafe { Mmap::map(&file)? }))
    }

    /// Grow the allocation to hold at least `min_rows` rows.
    ///
    /// Growth is monotonic and append-only: existing bytes keep their
    /// offsets, new bytes read as zero until written. The previous mapping
    /// is replaced because its length is stale after `set_len`.
    pub fn ensure_capacity(&mut self, min_rows: u64) -> StoreResult<()> {
        if min_rows <= self.capacity_rows || self.row_stride == 0 {
            return Ok(());
        }
        let new_len = min_rows
            .checked_mul(self.row_stride)
            .ok_or(StoreError::CapacityOverflow {
                rows: min_rows,
                row_stride: self.row_stride,
            })?;
        usize::try_from(new_len).map_err(|_| StoreError::CapacityOverflow {
            rows: min_rows,
            row_stride: self.row_stride,
        })?;

        self.file.set_len(new_len)?;
        self.mmap = Some(unsafe { MmapMut::map_mut(&self.file)? });
        tracing::debug!(
            path = %self.path.display(),
            from_rows = self.capacity_rows,
            to_rows = min_rows,
            "grew backing file"
        );
        self.capacity_rows = min_rows;
        Ok(())
    }

    /// Rows the current allocation can hold.
    pub fn capacity_rows(&self) -> u64 {
        self.capacity_rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The mapped region.
    pub fn bytes(&self) -> &[u8] {
        match &self.mmap {
            Some(m) => m,
            None => &[],
        }
    }

    /// The mapped region, writable.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(m) => m,
            None => &mut [],
        }
    }

    /// Force dirty pages to stable storage.
    pub fn flush(&self) -> StoreResult<()> {
        if let Some(m) = &self.mmap {
            m.flush()?;
        }
        Ok(())
    }
}
