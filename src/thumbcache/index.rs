//! IMMM thumbcache index parsing.
//!
//! `thumbcache_idx.db` maps each Thumb Cache ID to its slots in the
//! per-resolution cache files. The record stride differs by Windows
//! generation and is informed by observation rather than documentation;
//! the index is parsed for reporting only and never consulted during
//! extraction.
use super::cache::FormatVersion;
use super::consts::*;
use crate::common::binary::{read_u32_le, read_u64_le};
use crate::common::error::{Error, Result};
use crate::common::reader::ByteReader;
use log::warn;
use std::collections::HashMap;
use std::path::Path;

/// Parsed 24-byte index file header.
#[derive(Debug, Clone)]
pub struct IndexHeader {
    pub version: FormatVersion,
    pub cache_type_flags: u32,
    pub available_entries: u32,
    pub total_entries: u32,
    pub used_entries: u32,
}

/// One index record: flags plus the entry's offset in each resolution
/// bucket.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub flags: u32,
    /// Per-bucket offsets; `NO_OFFSET` marks an absent rendition
    pub offsets: Vec<u32>,
}

impl IndexEntry {
    /// Bucket indices that hold a rendition for this cache id.
    pub fn present_buckets(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .filter(|&(_, &offset)| offset != NO_OFFSET)
            .map(|(bucket, _)| bucket)
    }
}

/// A fully parsed index file: header plus a cache-id keyed map.
#[derive(Debug)]
pub struct IndexFile {
    pub header: IndexHeader,
    pub entries: HashMap<u64, IndexEntry>,
}

impl IndexFile {
    /// Observed per-version record strides.
    fn record_stride(version: FormatVersion) -> usize {
        match version {
            FormatVersion::WindowsVista | FormatVersion::Windows7 => 32,
            FormatVersion::Windows8 | FormatVersion::Windows81 => 40,
            FormatVersion::Windows10 => 72,
        }
    }

    pub fn open(mut reader: ByteReader) -> Result<Self> {
        let head = reader.read_at(0, CACHE_HEADER_SIZE)?;
        if &head[..4] != IMMM {
            return Err(Error::BadSignature);
        }
        let raw_version = read_u32_le(&head, 4)?;
        let version = FormatVersion::from_raw(raw_version).ok_or_else(|| {
            Error::BadHeader(format!("unknown index format version {raw_version}"))
        })?;
        let header = IndexHeader {
            version,
            cache_type_flags: read_u32_le(&head, 8)?,
            available_entries: read_u32_le(&head, 12)?,
            total_entries: read_u32_le(&head, 16)?,
            used_entries: read_u32_le(&head, 20)?,
        };

        let stride = Self::record_stride(version);
        let body = reader.read_at_most(CACHE_HEADER_SIZE as u64, usize::MAX >> 1)?;
        let capacity = body.len() / stride;
        let mut entries = HashMap::with_capacity(header.used_entries as usize);
        for slot in 0..capacity {
            let record = &body[slot * stride..(slot + 1) * stride];
            let flags = read_u32_le(record, 0)?;
            let hash = read_u64_le(record, 4)?;
            if hash == 0 {
                // Unused slot
                continue;
            }
            let offsets: Vec<u32> = record[12..]
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            entries.insert(hash, IndexEntry { flags, offsets });
        }

        if entries.len() as u32 != header.used_entries {
            warn!(
                "index declares {} used entries, parsed {}",
                header.used_entries,
                entries.len()
            );
        }

        Ok(IndexFile { header, entries })
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(ByteReader::open(path)?)
    }

    pub fn lookup(&self, cache_id: u64) -> Option<&IndexEntry> {
        self.entries.get(&cache_id)
    }
}

/// Check whether leading bytes look like a thumbcache index file.
pub fn is_immm_signature(data: &[u8]) -> bool {
    data.len() >= 4 && &data[..4] == IMMM
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn index_bytes(version: u32, records: &[(u32, u64, &[u32])], stride: usize) -> Vec<u8> {
        let used = records.iter().filter(|&&(_, h, _)| h != 0).count() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(IMMM);
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(records.len() as u32 - used).to_le_bytes());
        out.extend_from_slice(&(records.len() as u32).to_le_bytes());
        out.extend_from_slice(&used.to_le_bytes());
        for &(flags, hash, offsets) in records {
            let start = out.len();
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&hash.to_le_bytes());
            for &offset in offsets {
                out.extend_from_slice(&offset.to_le_bytes());
            }
            out.resize(start + stride, 0xFF);
        }
        out
    }

    fn open_bytes(bytes: &[u8]) -> Result<IndexFile> {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        IndexFile::open(ByteReader::open(f.path()).unwrap())
    }

    #[test]
    fn windows10_records_use_wide_stride() {
        let offsets = [5u32, NO_OFFSET, 12, NO_OFFSET];
        let bytes = index_bytes(
            FORMAT_WIN10,
            &[(1, 0xABCD, &offsets), (0, 0, &[]), (1, 0x1234, &offsets)],
            72,
        );
        let index = open_bytes(&bytes).unwrap();
        assert_eq!(index.header.version, FormatVersion::Windows10);
        assert_eq!(index.entries.len(), 2);
        let entry = index.lookup(0xABCD).unwrap();
        assert_eq!(entry.offsets.len(), (72 - 12) / 4);
        let present: Vec<usize> = entry.present_buckets().collect();
        assert_eq!(present, vec![0, 2]);
    }

    #[test]
    fn windows7_records_use_narrow_stride() {
        let offsets = [7u32];
        let bytes = index_bytes(FORMAT_WIN7, &[(1, 42, &offsets)], 32);
        let index = open_bytes(&bytes).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.lookup(42).unwrap().offsets.len(), (32 - 12) / 4);
        assert!(index.lookup(43).is_none());
    }

    #[test]
    fn zero_hash_slots_are_skipped() {
        let bytes = index_bytes(FORMAT_WIN8, &[(0, 0, &[]), (0, 0, &[])], 40);
        let index = open_bytes(&bytes).unwrap();
        assert!(index.entries.is_empty());
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let mut bytes = index_bytes(FORMAT_WIN8, &[], 40);
        bytes[0] = b'X';
        assert!(matches!(open_bytes(&bytes), Err(Error::BadSignature)));
    }
}
