//! Disk-backed, memory-mapped numeric array store.
//!
//! A store keeps one large homogeneous array in a flat backing file and an
//! index of independently-named sub-arrays ("pointers") concatenated along
//! the first axis. Writers in cooperating processes fill disjoint ranges
//! without coordination; readers map the file and serve whole-array, slice,
//! or name-based views with page-fault latency and no parse cost on the
//! data path.
//!
//! # Architecture
//!
//! - **Store** (`<base>.arr` + `<base>.idx`): flat data region plus a
//!   CRC-sealed header/index record, rewritten atomically on flush
//! - **[`ArrayWriter`]**: writes named or anonymous chunks at explicit
//!   first-axis positions, commits the index with a union merge
//! - **[`ArrayReader`]**: random-access, slice, and name-based zero-copy
//!   views over the mapping
//! - **[`ArrayView`]**: the capability-bounded window handed to `ndarray`
//!   for reductions, equality, and iteration
//!
//! # Concurrency contract
//!
//! Writers are safe concurrently only under the disjoint write discipline:
//! no two writers ever target overlapping first-axis ranges. The store does
//! not serialize overlapping writes; they produce undefined bytes. Index
//! flushes union with the on-disk table so sequential flushes from many
//! writers all land, but flushes racing on the same instant may drop the
//! earlier writer's entries: finish all writes, join, then flush once.
//! Readers are always safe alongside each other and alongside disjoint
//! in-flight writes, and must only trust ranges present in the index.

pub mod backing;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod reader;
pub mod view;
pub mod writer;

pub use backing::{BackingFile, StorePaths};
pub use dtype::{DType, Element};
pub use error::{StoreError, StoreResult};
pub use layout::{offset_of, row_stride, Descriptor, IndexEntry};
pub use reader::{read_header, ArrayReader};
pub use view::ArrayView;
pub use writer::ArrayWriter;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use std::path::PathBuf;

    fn chunk(values: std::ops::Range<i32>) -> ndarray::ArrayD<i32> {
        Array1::from_iter(values).into_dyn()
    }

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("store")
    }

    #[test]
    fn write_flush_reopen_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut writer = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();
        let (a, b) = (chunk(0..10), chunk(10..20));
        writer
            .write(&[("a", a.view()), ("b", b.view())], 0)
            .unwrap();
        writer.flush().unwrap();
        writer.close().unwrap();

        let reader = ArrayReader::open(&path).unwrap();
        assert_eq!(
            reader.get_by_name("a").unwrap().as_slice::<i32>().unwrap(),
            (0..10).collect::<Vec<_>>().as_slice()
        );
        assert_eq!(
            reader.get_by_name("b").unwrap().as_slice::<i32>().unwrap(),
            (10..20).collect::<Vec<_>>().as_slice()
        );
        assert_eq!(reader.full_view().to_ndarray::<i32>().unwrap().sum(), 190);
    }

    #[test]
    fn two_writers_union_their_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        // Two independent handles on the same store, writing disjoint
        // ranges and flushing sequentially.
        let mut first = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();
        let mut second = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();

        let a = chunk(0..10);
        first.write(&[("a", a.view())], 0).unwrap();
        first.flush().unwrap();

        let b = chunk(10..20);
        second.write(&[("b", b.view())], 10).unwrap();
        second.flush().unwrap();

        first.close().unwrap();
        second.close().unwrap();

        let reader = ArrayReader::open(&path).unwrap();
        assert_eq!(reader.index_len(), 2);
        assert_eq!(
            reader.get_by_name("a").unwrap().as_slice::<i32>().unwrap(),
            (0..10).collect::<Vec<_>>().as_slice()
        );
        assert_eq!(
            reader.get_by_name("b").unwrap().as_slice::<i32>().unwrap(),
            (10..20).collect::<Vec<_>>().as_slice()
        );
    }

    #[test]
    fn committed_ranges_stay_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut writer = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();
        let (a, c, b) = (chunk(0..10), chunk(0..5), chunk(0..10));
        // Sparse commits: a gap between "a" and "b" is allowed.
        writer.write(&[("a", a.view())], 0).unwrap();
        writer.write(&[("b", b.view())], 30).unwrap();
        writer.write(&[("c", c.view())], 15).unwrap();
        writer.close().unwrap();

        let reader = ArrayReader::open(&path).unwrap();
        let entries: Vec<_> = reader.indices().collect();
        for (i, &(_, (s1, e1))) in entries.iter().enumerate() {
            for &(_, (s2, e2)) in &entries[i + 1..] {
                assert!(e1 <= s2 || e2 <= s1, "ranges overlap");
            }
        }
    }

    #[test]
    fn growth_preserves_written_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut writer = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();
        let a = chunk(0..10);
        writer.write(&[("a", a.view())], 0).unwrap();
        let before = writer.capacity();

        // Writing far past the allocation grows it.
        let far = chunk(100..110);
        writer.write(&[("far", far.view())], 1000).unwrap();
        assert!(writer.capacity() > before);
        writer.close().unwrap();

        let reader = ArrayReader::open(&path).unwrap();
        assert_eq!(
            reader.get_by_name("a").unwrap().as_slice::<i32>().unwrap(),
            (0..10).collect::<Vec<_>>().as_slice()
        );
        // The gap between the two commits reads as zero.
        let gap = reader.get_slice(10, 1000).unwrap();
        assert!(gap.as_slice::<i32>().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut writer = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();
        let a = chunk(0..10);
        writer.write(&[("a", a.view())], 0).unwrap();
        writer.flush().unwrap();
        let first = std::fs::read(path.with_extension("idx")).unwrap();

        writer.flush().unwrap();
        let second = std::fs::read(path.with_extension("idx")).unwrap();
        assert_eq!(first, second);
        writer.close().unwrap();
    }

    #[test]
    fn drop_flushes_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        {
            let mut writer = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();
            let a = chunk(0..10);
            writer.write(&[("a", a.view())], 0).unwrap();
            // No explicit flush or close.
        }
        let reader = ArrayReader::open(&path).unwrap();
        assert_eq!(reader.index_len(), 1);
        assert_eq!(
            reader.get_by_name("a").unwrap().as_slice::<i32>().unwrap(),
            (0..10).collect::<Vec<_>>().as_slice()
        );
    }

    #[test]
    fn multi_axis_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut writer = ArrayWriter::create(&path, &[0, 3], DType::F64, false).unwrap();
        let rows = ndarray::Array2::from_shape_fn((4, 3), |(r, c)| (r * 3 + c) as f64).into_dyn();
        writer.write(&[("block", rows.view())], 0).unwrap();
        writer.close().unwrap();

        let reader = ArrayReader::open(&path).unwrap();
        assert_eq!(reader.shape(), &[4, 3]);
        let block = reader.get_by_name("block").unwrap();
        assert_eq!(block.shape(), vec![4, 3]);
        let arr = block.to_ndarray::<f64>().unwrap();
        assert_eq!(arr.sum(), (0..12).sum::<usize>() as f64);
        assert_eq!(arr[[2, 1]], 7.0);
    }

    #[test]
    fn anonymous_and_named_writes_share_the_axis() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut writer = ArrayWriter::create(&path, &[0], DType::I32, false).unwrap();
        let head = chunk(0..5);
        writer.append_rows(&[head.view()]).unwrap();
        let named = chunk(5..10);
        writer.append(&[("tail", named.view())]).unwrap();
        writer.close().unwrap();

        let reader = ArrayReader::open(&path).unwrap();
        assert_eq!(reader.len(), 10);
        assert_eq!(reader.index_len(), 1);
        assert_eq!(
            reader.get_by_name("tail").unwrap().as_slice::<i32>().unwrap(),
            (5..10).collect::<Vec<_>>().as_slice()
        );
        assert_eq!(
            reader.full_view().as_slice::<i32>().unwrap(),
            (0..10).collect::<Vec<_>>().as_slice()
        );
    }
}
