//! `Catalog` stream decoding.
//!
//! Thumbs.db containers carry a `Catalog` stream binding each thumbnail
//! stream id to the original file name and its last-modified FILETIME.
use crate::common::binary::{read_u16_le, read_u32_le, read_u64_le, utf16le_to_string};
use crate::common::error::Result;
use crate::common::time::filetime_to_utc;
use chrono::{DateTime, Utc};
use log::warn;

/// Fixed fields preceding the name in every catalog record.
const RECORD_FIXED_LEN: usize = 2 + 4 + 8;

/// Catalog stream header fields.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub version: u16,
    pub declared_entries: u32,
    pub largest_width: u32,
    pub largest_height: u32,
    /// Records in file order.
    pub records: Vec<CatalogRecord>,
}

/// One catalog record: the stream id, the original file name, and the
/// source file's modification time.
#[derive(Debug, Clone)]
pub struct CatalogRecord {
    pub stream_id: u32,
    pub mtime: Option<DateTime<Utc>>,
    pub name: String,
}

impl Catalog {
    /// Parse a `Catalog` stream. Stops at a zero length prefix or at the
    /// end of the stream; a record that does not fit is dropped with a
    /// warning rather than failing the container.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Ok(Catalog::default());
        }
        let version = read_u16_le(data, 2)?;
        let declared_entries = read_u32_le(data, 4)?;
        let largest_width = read_u32_le(data, 8)?;
        let largest_height = read_u32_le(data, 12)?;

        let mut records = Vec::new();
        let mut offset = 16usize;
        while offset + RECORD_FIXED_LEN <= data.len() {
            let length = read_u16_le(data, offset)? as usize;
            if length == 0 {
                break;
            }
            if length < RECORD_FIXED_LEN || offset + length > data.len() {
                warn!(
                    "catalog record at offset {offset} declares {length} bytes, \
                     {} remain; stopping",
                    data.len() - offset
                );
                break;
            }
            let stream_id = read_u32_le(data, offset + 2)?;
            let mtime = filetime_to_utc(read_u64_le(data, offset + 6)?);
            // Name runs to the record end: NUL terminator plus four zero
            // trailer bytes are stripped by the decoder.
            let name = utf16le_to_string(&data[offset + RECORD_FIXED_LEN..offset + length]);
            records.push(CatalogRecord {
                stream_id,
                mtime,
                name,
            });
            offset += length;
        }

        if records.len() as u32 != declared_entries {
            warn!(
                "catalog declares {declared_entries} entries, parsed {}",
                records.len()
            );
        }

        Ok(Catalog {
            version,
            declared_entries,
            largest_width,
            largest_height,
            records,
        })
    }

    /// Find the record for a stream id.
    pub fn record_for(&self, stream_id: u32) -> Option<&CatalogRecord> {
        self.records.iter().find(|r| r.stream_id == stream_id)
    }
}

/// OLE stream names are the decimal stream id reversed: id 42 is stored in
/// the stream named "24".
pub fn stream_name_for_id(stream_id: u32) -> String {
    stream_id.to_string().chars().rev().collect()
}

/// Inverse of [`stream_name_for_id`]; `None` for non-numeric names such as
/// `Catalog`.
pub fn stream_id_for_name(name: &str) -> Option<u32> {
    let reversed: String = name.chars().rev().collect();
    reversed.parse().ok()
}

#[cfg(test)]
pub(crate) fn build_record(stream_id: u32, filetime: u64, name: &str) -> Vec<u8> {
    let name_utf16: Vec<u8> = name
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    let length = RECORD_FIXED_LEN + name_utf16.len() + 2 + 4;
    let mut rec = Vec::with_capacity(length);
    rec.extend_from_slice(&(length as u16).to_le_bytes());
    rec.extend_from_slice(&stream_id.to_le_bytes());
    rec.extend_from_slice(&filetime.to_le_bytes());
    rec.extend_from_slice(&name_utf16);
    rec.extend_from_slice(&[0, 0]); // NUL terminator
    rec.extend_from_slice(&[0, 0, 0, 0]);
    rec
}

#[cfg(test)]
pub(crate) fn build_catalog(records: &[(u32, u64, &str)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&16u16.to_le_bytes());
    data.extend_from_slice(&5u16.to_le_bytes());
    data.extend_from_slice(&(records.len() as u32).to_le_bytes());
    data.extend_from_slice(&96u32.to_le_bytes());
    data.extend_from_slice(&96u32.to_le_bytes());
    for &(id, ft, name) in records {
        data.extend_from_slice(&build_record(id, ft, name));
    }
    data
}
