//! Header/index record codec and first-axis byte arithmetic.
//!
//! The header lives in the sidecar `.idx` file, separate from the flat data
//! region, so the data mapping starts page-aligned at element zero. Layout
//! (all integers big-endian):
//!
//! - Magic `b"SLTA"` + version (major byte, minor byte)
//! - Dtype code, reserved byte, element size
//! - Shape: dimension count + one `u64` per axis (`shape[0]` is the
//!   committed first-axis length, repeated in a dedicated length field)
//! - Index table: entry count + `(name length, name, start, end)` records
//! - CRC32 over everything preceding it
//!
//! Readers accept any header with a matching major version; unknown fields
//! a newer minor version appends before the CRC are ignored, and the CRC
//! still covers them.

use crate::dtype::DType;
use crate::error::{StoreError, StoreResult};

pub(crate) const MAGIC: &[u8; 4] = b"SLTA";

/// Format version: major in the high byte, minor in the low byte.
pub(crate) const FORMAT_VERSION: u16 = 0x0100;

const FORMAT_MAJOR: u8 = (FORMAT_VERSION >> 8) as u8;

/// A named half-open range over the store's first axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// Half-open range disjointness test.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        !(self.end <= start || end <= self.start)
    }
}

/// In-memory form of the header/index record.
///
/// `shape[0]` is the committed first-axis length; the trailing axes fix the
/// shape of every row. The index table preserves commit order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub dtype: DType,
    pub shape: Vec<u64>,
    pub entries: Vec<IndexEntry>,
}

impl Descriptor {
    /// Create a descriptor with an empty index table.
    ///
    /// The shape must have at least one axis; the total byte size of the
    /// declared shape must be addressable in 64 bits.
    pub fn new(dtype: DType, shape: Vec<u64>) -> StoreResult<Self> {
        if shape.is_empty() {
            return Err(StoreError::InvalidShape {
                shape,
                reason: "at least one axis is required".into(),
            });
        }
        let stride = checked_row_stride(&shape, dtype.size()).ok_or_else(|| {
            StoreError::InvalidShape {
                shape: shape.clone(),
                reason: "row stride overflows u64".into(),
            }
        })?;
        if shape[0].checked_mul(stride).is_none() {
            return Err(StoreError::CapacityOverflow {
                rows: shape[0],
                row_stride: stride,
            });
        }
        Ok(Self {
            dtype,
            shape,
            entries: Vec::new(),
        })
    }

    /// Committed first-axis length.
    pub fn length(&self) -> u64 {
        self.shape[0]
    }

    /// Shape of one row (everything after the first axis).
    pub fn trailing_shape(&self) -> &[u64] {
        &self.shape[1..]
    }

    /// Bytes occupied by one increment of the first axis.
    pub fn row_stride(&self) -> u64 {
        row_stride(&self.shape, self.dtype.size())
    }

    /// Linear scan lookup; readers build a hash index on top of this.
    pub fn lookup(&self, name: &str) -> Option<(u64, u64)> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| (e.start, e.end))
    }

    /// First committed entry overlapping `[start, end)`, if any.
    pub fn find_overlap(&self, start: u64, end: u64) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.overlaps(start, end))
    }

    /// Serialize to the on-disk record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        buf.push(self.dtype.code());
        buf.push(0); // reserved
        buf.extend_from_slice(&(self.dtype.size() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.shape.len() as u32).to_be_bytes());
        for &dim in &self.shape {
            buf.extend_from_slice(&dim.to_be_bytes());
        }
        buf.extend_from_slice(&self.length().to_be_bytes());
        buf.extend_from_slice(&(self.entries.len() as u64).to_be_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&(entry.name.len() as u32).to_be_bytes());
            buf.extend_from_slice(entry.name.as_bytes());
            buf.extend_from_slice(&entry.start.to_be_bytes());
            buf.extend_from_slice(&entry.end.to_be_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Deserialize from the on-disk record.
    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        // Magic + version + dtype + reserved + elem size + ndim + length +
        // entry count + trailing CRC.
        if data.len() < 4 + 2 + 2 + 4 + 4 + 8 + 8 + 4 {
            return Err(StoreError::CorruptHeader {
                reason: "header too short".into(),
            });
        }
        if &data[0..4] != MAGIC {
            return Err(StoreError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u16::from_be_bytes(data[4..6].try_into().unwrap());
        if (version >> 8) as u8 != FORMAT_MAJOR {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let payload_len = data.len() - 4;
        let stored_crc = u32::from_be_bytes(data[payload_len..].try_into().unwrap());
        if crc32fast::hash(&data[..payload_len]) != stored_crc {
            return Err(StoreError::CorruptHeader {
                reason: "checksum mismatch".into(),
            });
        }

        let mut cursor = Cursor::new(&data[..payload_len], 6);
        let dtype_code = cursor.read_u8()?;
        let dtype = DType::from_code(dtype_code).ok_or_else(|| StoreError::CorruptHeader {
            reason: format!("unknown dtype code: {dtype_code}"),
        })?;
        let reserved = cursor.read_u8()?;
        if reserved != 0 {
            return Err(StoreError::CorruptHeader {
                reason: format!("nonzero reserved byte: {reserved}"),
            });
        }
        let elem_size = cursor.read_u32()?;
        if u64::from(elem_size) != dtype.size() {
            return Err(StoreError::CorruptHeader {
                reason: format!("element size {elem_size} disagrees with dtype {dtype}"),
            });
        }

        let ndim = cursor.read_u32()?;
        if ndim == 0 {
            return Err(StoreError::CorruptHeader {
                reason: "zero-dimensional shape".into(),
            });
        }
        let mut shape = Vec::with_capacity(ndim as usize);
        for _ in 0..ndim {
            shape.push(cursor.read_u64()?);
        }
        let stride = checked_row_stride(&shape, dtype.size()).ok_or_else(|| {
            StoreError::CorruptHeader {
                reason: format!("shape {shape:?} overflows the addressable range"),
            }
        })?;
        if shape[0].checked_mul(stride).is_none() {
            return Err(StoreError::CorruptHeader {
                reason: format!("shape {shape:?} overflows the addressable range"),
            });
        }
        let length = cursor.read_u64()?;
        if length != shape[0] {
            return Err(StoreError::CorruptHeader {
                reason: format!(
                    "committed length {length} disagrees with first axis {}",
                    shape[0]
                ),
            });
        }

        let entry_count = cursor.read_u64()?;
        let mut entries = Vec::new();
        for _ in 0..entry_count {
            let name_len = cursor.read_u32()? as usize;
            let name_bytes = cursor.read_bytes(name_len)?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| StoreError::CorruptHeader {
                    reason: "entry name is not valid UTF-8".into(),
                })?
                .to_string();
            let start = cursor.read_u64()?;
            let end = cursor.read_u64()?;
            if start > end {
                return Err(StoreError::CorruptHeader {
                    reason: format!("entry \"{name}\" has inverted range [{start}, {end})"),
                });
            }
            entries.push(IndexEntry { name, start, end });
        }
        // Bytes between the index table and the CRC belong to a newer minor
        // version and are ignored.

        Ok(Self {
            dtype,
            shape,
            entries,
        })
    }
}

/// Bytes occupied by one increment of the first axis.
pub fn row_stride(shape: &[u64], elem_size: u64) -> u64 {
    shape[1..].iter().product::<u64>() * elem_size
}

/// Byte offset of a first-axis position in the backing region.
pub fn offset_of(position: u64, shape: &[u64], elem_size: u64) -> u64 {
    position * row_stride(shape, elem_size)
}

fn checked_row_stride(shape: &[u64], elem_size: u64) -> Option<u64> {
    shape[1..]
        .iter()
        .try_fold(elem_size, |acc, &dim| acc.checked_mul(dim))
}

/// Bounds-checked sequential reader over the header payload.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn read_bytes(&mut self, len: usize) -> StoreResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(StoreError::CorruptHeader {
                reason: "truncated header field".into(),
            }),
        }
    }

    fn read_u8(&mut self) -> StoreResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> StoreResult<u32> {
        Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> StoreResult<u64> {
        Ok(u64::from_be_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Descriptor {
        let mut d = Descriptor::new(DType::I32, vec![20, 3]).unwrap();
        d.entries.push(IndexEntry::new("a", 0, 10));
        d.entries.push(IndexEntry::new("b", 10, 20));
        d
    }

    #[test]
    fn roundtrip() {
        let d = sample();
        let decoded = Descriptor::from_bytes(&d.to_bytes()).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn roundtrip_empty_store() {
        let d = Descriptor::new(DType::F64, vec![0]).unwrap();
        let decoded = Descriptor::from_bytes(&d.to_bytes()).unwrap();
        assert_eq!(decoded, d);
        assert_eq!(decoded.length(), 0);
        assert!(decoded.entries.is_empty());
    }

    #[test]
    fn bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0..4].copy_from_slice(b"BADM");
        let err = Descriptor::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMagic { .. }));
    }

    #[test]
    fn bad_major_version() {
        let mut bytes = sample().to_bytes();
        bytes[4..6].copy_from_slice(&0x0200u16.to_be_bytes());
        // CRC covers the version field, so re-seal the payload.
        let crc_at = bytes.len() - 4;
        let crc = crc32fast::hash(&bytes[..crc_at]);
        bytes[crc_at..].copy_from_slice(&crc.to_be_bytes());
        let err = Descriptor::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion(0x0200)));
    }

    #[test]
    fn newer_minor_version_parses() {
        let d = sample();
        let mut bytes = d.to_bytes();
        let crc_at = bytes.len() - 4;
        bytes.truncate(crc_at);
        bytes[4..6].copy_from_slice(&0x0101u16.to_be_bytes());
        // A hypothetical 1.1 field appended after the index table.
        bytes.extend_from_slice(&0xDEADBEEFu32.to_be_bytes());
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        let decoded = Descriptor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn truncated() {
        let bytes = sample().to_bytes();
        let err = Descriptor::from_bytes(&bytes[..10]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptHeader { .. }));
    }

    #[test]
    fn checksum_mismatch() {
        let mut bytes = sample().to_bytes();
        let flip = bytes.len() - 20;
        bytes[flip] ^= 0xFF;
        let err = Descriptor::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::CorruptHeader { .. }));
    }

    #[test]
    fn entry_count_beyond_payload() {
        let d = sample();
        let mut bytes = d.to_bytes();
        let crc_at = bytes.len() - 4;
        bytes.truncate(crc_at);
        // Claim far more entries than the payload holds.
        let count_at = 4 + 2 + 2 + 4 + 4 + 8 * d.shape.len() + 8;
        bytes[count_at..count_at + 8].copy_from_slice(&u64::MAX.to_be_bytes());
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        let err = Descriptor::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::CorruptHeader { .. }));
    }

    #[test]
    fn length_axis_disagreement() {
        let d = sample();
        let mut bytes = d.to_bytes();
        let crc_at = bytes.len() - 4;
        bytes.truncate(crc_at);
        let length_at = 4 + 2 + 2 + 4 + 4 + 8 * d.shape.len();
        bytes[length_at..length_at + 8].copy_from_slice(&99u64.to_be_bytes());
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        let err = Descriptor::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::CorruptHeader { .. }));
    }

    #[test]
    fn rejects_empty_shape() {
        let err = Descriptor::new(DType::I32, vec![]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidShape { .. }));
    }

    #[test]
    fn rejects_overflowing_shape() {
        let err = Descriptor::new(DType::I64, vec![u64::MAX, u64::MAX]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidShape { .. } | StoreError::CapacityOverflow { .. }
        ));
    }

    #[test]
    fn stride_and_offset() {
        let shape = vec![100, 4, 2];
        assert_eq!(row_stride(&shape, 4), 32);
        assert_eq!(offset_of(0, &shape, 4), 0);
        assert_eq!(offset_of(7, &shape, 4), 224);

        let flat = vec![100];
        assert_eq!(row_stride(&flat, 8), 8);
        assert_eq!(offset_of(3, &flat, 8), 24);
    }

    #[test]
    fn overlap_predicate() {
        let e = IndexEntry::new("x", 10, 20);
        assert!(e.overlaps(15, 25));
        assert!(e.overlaps(5, 11));
        assert!(e.overlaps(10, 20));
        assert!(!e.overlaps(0, 10));
        assert!(!e.overlaps(20, 30));
        assert!(!e.overlaps(15, 15)); // empty range overlaps nothing
    }

    proptest! {
        #[test]
        fn roundtrip_holds_for_any_descriptor(
            dtype_code in 1u8..=10,
            trailing in proptest::collection::vec(0u64..16, 0..3),
            ranges in proptest::collection::vec((0u64..1000, 0u64..100), 0..8),
        ) {
            let dtype = DType::from_code(dtype_code).unwrap();
            let mut shape = vec![0u64];
            shape.extend(trailing);

            let mut length = 0;
            let mut entries = Vec::new();
            // Build disjoint back-to-back ranges so the descriptor is valid.
            let mut pos = 0u64;
            for (i, (gap, rows)) in ranges.into_iter().enumerate() {
                let start = pos + gap;
                let end = start + rows;
                entries.push(IndexEntry::new(format!("entry-{i}"), start, end));
                pos = end;
                length = end;
            }
            shape[0] = length;

            let mut d = Descriptor::new(dtype, shape).unwrap();
            d.entries = entries;

            let decoded = Descriptor::from_bytes(&d.to_bytes()).unwrap();
            prop_assert_eq!(decoded, d);
        }
    }
}
