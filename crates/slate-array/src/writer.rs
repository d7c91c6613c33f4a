//! Writing chunks into a store and committing the index.
//!
//! An `ArrayWriter` is one process's handle onto a store. Several writers
//! may target the same path concurrently as long as they keep to the
//! disjoint write discipline: every writer's first-axis ranges stay disjoint
//! from every other writer's for the life of the store. Overlap detection
//! here is best-effort: it sees only the ranges this handle knows about
//! (its own writes plus whatever the index held at open and flush time).

use std::collections::HashMap;
use std::io;
use std::path::Path;

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};

use crate::backing::{BackingFile, StorePaths};
use crate::dtype::{DType, Element};
use crate::error::{StoreError, StoreResult};
use crate::layout::{offset_of, Descriptor, IndexEntry};

/// Writes named or anonymous chunks into a store.
#[derive(Debug)]
pub struct ArrayWriter {
    paths: StorePaths,
    /// `None` once closed; every operation checks this first.
    backing: Option<BackingFile>,
    /// Committed length, shape, and all index entries known to this handle.
    descriptor: Descriptor,
    /// Fast name lookup over `descriptor.entries`.
    by_name: HashMap<String, (u64, u64)>,
    /// Append position for the cursor-based write methods.
    cursor: u64,
}

impl ArrayWriter {
    /// Open or create the store at `base`.
    ///
    /// With `truncate`, any existing store files are removed first.
    /// Otherwise an existing store is adopted after validating that its
    /// dtype and trailing shape match the request; the requested first-axis
    /// extent only pre-allocates capacity.
    pub fn create(base: &Path, shape: &[u64], dtype: DType, truncate: bool) -> StoreResult<Self> {
        let paths = StorePaths::from_base(base);
        let requested = Descriptor::new(dtype, shape.to_vec())?;

        if truncate {
            for path in [&paths.data, &paths.index] {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if paths.index.exists() {
            let bytes = std::fs::read(&paths.index)?;
            let stored = Descriptor::from_bytes(&bytes)?;
            if stored.dtype != requested.dtype
                || stored.trailing_shape() != requested.trailing_shape()
            {
                return Err(StoreError::ShapeDtypeMismatch {
                    stored_dtype: stored.dtype,
                    stored_shape: stored.shape,
                    requested_dtype: requested.dtype,
                    requested_shape: requested.shape,
                });
            }
            let stride = stored.row_stride();
            let mut backing = if paths.data.exists() {
                BackingFile::open_rw(&paths.data, stride)?
            } else {
                BackingFile::create(&paths.data, stored.length(), stride)?
            };
            backing.ensure_capacity(stored.length().max(requested.length()))?;

            let cursor = stored.length();
            let by_name = stored
                .entries
                .iter()
                .map(|e| (e.name.clone(), (e.start, e.end)))
                .collect();
            Ok(Self {
                paths,
                backing: Some(backing),
                descriptor: stored,
                by_name,
                cursor,
            })
        } else {
            let backing =
                BackingFile::create(&paths.data, requested.length(), requested.row_stride())?;
            let writer = Self {
                paths,
                backing: Some(backing),
                descriptor: requested,
                by_name: HashMap::new(),
                cursor: 0,
            };
            // Persist the header now so a concurrent handle can validate
            // against it before our first flush.
            persist_descriptor(&writer.paths.index, &writer.descriptor)?;
            Ok(writer)
        }
    }

    /// Write named chunks laid out back-to-back from `start`.
    ///
    /// Each chunk occupies `[pos, pos + rows)` where `pos` starts at `start`
    /// and advances past every chunk in iteration order. Every range is
    /// checked against the entries this handle knows about; re-writing a
    /// name with its already-committed range is an idempotent no-op,
    /// re-writing it with a different range is an error.
    pub fn write<T: Element>(
        &mut self,
        entries: &[(&str, ArrayViewD<'_, T>)],
        start: u64,
    ) -> StoreResult<()> {
        let chunks: Vec<(Option<&str>, &ArrayViewD<'_, T>)> =
            entries.iter().map(|(name, c)| (Some(*name), c)).collect();
        self.write_impl(&chunks, start)?;
        Ok(())
    }

    /// As [`write`](Self::write), starting at the append cursor.
    ///
    /// The cursor begins at the committed length when the store is opened
    /// and advances past every appended chunk.
    pub fn append<T: Element>(&mut self, entries: &[(&str, ArrayViewD<'_, T>)]) -> StoreResult<()> {
        let chunks: Vec<(Option<&str>, &ArrayViewD<'_, T>)> =
            entries.iter().map(|(name, c)| (Some(*name), c)).collect();
        self.cursor = self.write_impl(&chunks, self.cursor)?;
        Ok(())
    }

    /// Write anonymous chunks back-to-back from `start`.
    ///
    /// No index entries are created and no overlap detection applies; the
    /// committed length still grows to cover the written rows.
    pub fn write_rows<T: Element>(
        &mut self,
        chunks: &[ArrayViewD<'_, T>],
        start: u64,
    ) -> StoreResult<()> {
        let chunks: Vec<(Option<&str>, &ArrayViewD<'_, T>)> =
            chunks.iter().map(|c| (None, c)).collect();
        self.write_impl(&chunks, start)?;
        Ok(())
    }

    /// As [`write_rows`](Self::write_rows), starting at the append cursor.
    pub fn append_rows<T: Element>(&mut self, chunks: &[ArrayViewD<'_, T>]) -> StoreResult<()> {
        let chunks: Vec<(Option<&str>, &ArrayViewD<'_, T>)> =
            chunks.iter().map(|c| (None, c)).collect();
        self.cursor = self.write_impl(&chunks, self.cursor)?;
        Ok(())
    }

    fn write_impl<T: Element>(
        &mut self,
        chunks: &[(Option<&str>, &ArrayViewD<'_, T>)],
        start: u64,
    ) -> StoreResult<u64> {
        if self.backing.is_none() {
            return Err(StoreError::Closed);
        }
        if T::DTYPE != self.descriptor.dtype {
            return Err(StoreError::DtypeMismatch {
                requested: T::DTYPE,
                stored: self.descriptor.dtype,
            });
        }

        // Validate every chunk before touching the mapping, so a failed
        // call writes nothing.
        let mut planned: Vec<(u64, u64, Option<&str>)> = Vec::with_capacity(chunks.len());
        let mut pos = start;
        for (name, chunk) in chunks {
            let rows = self.check_chunk_shape(chunk.shape())?;
            let end = pos
                .checked_add(rows)
                .ok_or_else(|| StoreError::CapacityOverflow {
                    rows,
                    row_stride: self.descriptor.row_stride(),
                })?;
            if let Some(name) = name {
                self.check_named_range(name, pos, end, &planned)?;
            }
            planned.push((pos, end, *name));
            pos = end;
        }

        let backing = match self.backing.as_mut() {
            Some(b) => b,
            None => return Err(StoreError::Closed),
        };
        backing.ensure_capacity(pos)?;

        for ((range_start, range_end, _), (_, chunk)) in planned.iter().zip(chunks) {
            let from = offset_of(*range_start, &self.descriptor.shape, self.descriptor.dtype.size());
            let to = offset_of(*range_end, &self.descriptor.shape, self.descriptor.dtype.size());
            copy_chunk(
                &mut backing.bytes_mut()[from as usize..to as usize],
                chunk,
                *range_end - *range_start,
                self.descriptor.trailing_shape(),
            )?;
        }

        for (range_start, range_end, name) in planned {
            if let Some(name) = name {
                if !self.by_name.contains_key(name) {
                    self.descriptor
                        .entries
                        .push(IndexEntry::new(name, range_start, range_end));
                    self.by_name
                        .insert(name.to_string(), (range_start, range_end));
                }
            }
        }
        if pos > self.descriptor.length() {
            self.descriptor.shape[0] = pos;
        }
        Ok(pos)
    }

    fn check_chunk_shape(&self, chunk_shape: &[usize]) -> StoreResult<u64> {
        let expected = self.descriptor.trailing_shape();
        let actual: Vec<u64> = chunk_shape.iter().map(|&d| d as u64).collect();
        if actual.is_empty() || &actual[1..] != expected {
            return Err(StoreError::ShapeMismatch {
                expected: expected.to_vec(),
                actual,
            });
        }
        Ok(actual[0])
    }

    fn check_named_range(
        &self,
        name: &str,
        start: u64,
        end: u64,
        planned: &[(u64, u64, Option<&str>)],
    ) -> StoreResult<()> {
        if let Some(&(s, e)) = self.by_name.get(name) {
            if (s, e) == (start, end) {
                return Ok(()); // idempotent re-write of a committed chunk
            }
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        if planned.iter().any(|&(_, _, n)| n == Some(name)) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        if let Some(existing) = self.descriptor.find_overlap(start, end) {
            if existing.name != name {
                return Err(StoreError::RangeOverlap {
                    name: name.to_string(),
                    start,
                    end,
                    existing: existing.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Force written pages to disk and persist the index.
    ///
    /// The on-disk index is re-read and unioned with this handle's entries,
    /// so sequential flushes from independent writers all land. Two flushes
    /// racing on the read-union-write may still lose the earlier writer's
    /// entries: callers must let every writer finish before a final flush
    /// (the write, join, flush discipline). Safe to call repeatedly.
    pub fn flush(&mut self) -> StoreResult<()> {
        let backing = self.backing.as_ref().ok_or(StoreError::Closed)?;
        backing.flush()?;

        let merged = self.merged_descriptor()?;
        persist_descriptor(&self.paths.index, &merged)?;
        self.by_name = merged
            .entries
            .iter()
            .map(|e| (e.name.clone(), (e.start, e.end)))
            .collect();
        self.descriptor = merged;
        Ok(())
    }

    /// Union this handle's descriptor with whatever is on disk now.
    fn merged_descriptor(&self) -> StoreResult<Descriptor> {
        let mut merged = match std::fs::read(&self.paths.index) {
            Ok(bytes) => {
                let disk = Descriptor::from_bytes(&bytes)?;
                if disk.dtype != self.descriptor.dtype
                    || disk.trailing_shape() != self.descriptor.trailing_shape()
                {
                    return Err(StoreError::ShapeDtypeMismatch {
                        stored_dtype: disk.dtype,
                        stored_shape: disk.shape,
                        requested_dtype: self.descriptor.dtype,
                        requested_shape: self.descriptor.shape.clone(),
                    });
                }
                disk
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut empty = self.descriptor.clone();
                empty.entries.clear();
                empty.shape[0] = 0;
                empty
            }
            Err(e) => return Err(e.into()),
        };

        for entry in &self.descriptor.entries {
            match merged.lookup(&entry.name) {
                Some((s, e)) if (s, e) == (entry.start, entry.end) => {}
                Some(_) => return Err(StoreError::DuplicateName(entry.name.clone())),
                None => {
                    if let Some(existing) = merged.find_overlap(entry.start, entry.end) {
                        return Err(StoreError::RangeOverlap {
                            name: entry.name.clone(),
                            start: entry.start,
                            end: entry.end,
                            existing: existing.name.clone(),
                        });
                    }
                    merged.entries.push(entry.clone());
                }
            }
        }
        let length = merged.length().max(self.descriptor.length());
        merged.shape[0] = length;
        Ok(merged)
    }

    /// Flush, then release the mapping and file handle.
    ///
    /// Closing twice is a no-op; any other operation on a closed writer
    /// fails with [`StoreError::Closed`].
    pub fn close(&mut self) -> StoreResult<()> {
        if self.backing.is_none() {
            return Ok(());
        }
        self.flush()?;
        self.backing = None;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.backing.is_none()
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

    /// Rows the current allocation can hold (0 once closed).
    pub fn capacity(&self) -> u64 {
        self.backing.as_ref().map_or(0, |b| b.capacity_rows())
    }

    /// Index entries known to this handle, in commit order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.descriptor.entries
    }
}

impl Drop for ArrayWriter {
    fn drop(&mut self) {
        if self.backing.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(
                    path = %self.paths.index.display(),
                    "flush on writer drop failed: {e}"
                );
            }
        }
    }
}

/// Copy one chunk into its slot, delegating layout handling to `ndarray`.
fn copy_chunk<T: Element>(
    dest_bytes: &mut [u8],
    chunk: &ArrayViewD<'_, T>,
    rows: u64,
    trailing: &[u64],
) -> StoreResult<()> {
    let dest_slice: &mut [T] =
        bytemuck::try_cast_slice_mut(dest_bytes).map_err(|e| StoreError::CorruptHeader {
            reason: format!("backing region not viewable as {}: {e}", T::DTYPE),
        })?;
    let mut dims = vec![rows as usize];
    dims.extend(trailing.iter().map(|&d| d as usize));
    let mut dest = ArrayViewMutD::from_shape(IxDyn(&dims), dest_slice).map_err(|e| {
        StoreError::CorruptHeader {
            reason: format!("chunk slot disagrees with backing region: {e}"),
        }
    })?;
    dest.assign(chunk);
    Ok(())
}

/// Atomically replace the header/index record.
///
/// The record is written to a sibling temp file and renamed over the old
/// one, so a failed flush leaves the previous header intact.
fn persist_descriptor(path: &Path, descriptor: &Descriptor) -> StoreResult<()> {
    let tmp = path.with_extension("idx.tmp");
    std::fs::write(&tmp, descriptor.to_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
