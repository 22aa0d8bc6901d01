//! CMMM thumbcache entry file parsing.
//!
//! `thumbcache_*.db` files are flat runs of variable-size entries behind a
//! 24-byte header. Each entry carries a 64-bit Thumb Cache ID, an
//! identifier string, optional padding and the image payload. Entries with
//! no payload are dormant placeholders kept by Explorer for files it has
//! seen but not thumbnailed.
use super::consts::*;
use crate::common::binary::{read_u32_le, read_u64_le, utf16le_to_string};
use crate::common::cancel::CancelFlag;
use crate::common::error::{Error, Result};
use crate::common::reader::ByteReader;
use crc_fast::CrcAlgorithm;
use log::{debug, warn};
use std::path::Path;

/// Windows generation a cache file was written by, from its format
/// version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    WindowsVista,
    Windows7,
    Windows8,
    Windows81,
    Windows10,
}

impl FormatVersion {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            FORMAT_VISTA => Some(FormatVersion::WindowsVista),
            FORMAT_WIN7 => Some(FormatVersion::Windows7),
            FORMAT_WIN8 => Some(FormatVersion::Windows8),
            FORMAT_WIN8_1 => Some(FormatVersion::Windows81),
            FORMAT_WIN10 => Some(FormatVersion::Windows10),
            _ => None,
        }
    }

    /// Whether entries of this generation carry the fixed UTF-16 extension
    /// field instead of width and height.
    fn has_extension_field(self) -> bool {
        matches!(self, FormatVersion::WindowsVista | FormatVersion::Windows7)
    }
}

/// Resolution bucket of a cache file, from its cache type field.
///
/// The numeric meaning shifted between Windows generations; the mapping
/// below follows the versions' published tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBucket {
    Res16,
    Res32,
    Res48,
    Res96,
    Res256,
    Res768,
    Res1024,
    Res1280,
    Res1600,
    Res1920,
    Res2560,
    Sr,
    Wide,
    Exif,
    WideAlternate,
    CustomStream,
    Unknown(u32),
}

impl CacheBucket {
    pub fn from_raw(version: FormatVersion, raw: u32) -> Self {
        use CacheBucket::*;
        let table: &[CacheBucket] = match version {
            FormatVersion::WindowsVista | FormatVersion::Windows7 => {
                &[Res32, Res96, Res256, Res1024, Sr]
            }
            FormatVersion::Windows8 => {
                &[Res16, Res32, Res48, Res96, Res256, Res1024, Sr, Wide, Exif]
            }
            FormatVersion::Windows81 => &[
                Res16, Res32, Res48, Res96, Res256, Res1024, Res1600, Sr, Wide, Exif,
                WideAlternate,
            ],
            FormatVersion::Windows10 => &[
                Res16, Res32, Res48, Res96, Res256, Res768, Res1280, Res1920, Res2560, Sr, Wide,
                Exif, WideAlternate, CustomStream,
            ],
        };
        table.get(raw as usize).copied().unwrap_or(Unknown(raw))
    }
}

/// Payload format, recognized from the leading bytes of the image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Jpeg,
    Png,
    Bmp,
    Unknown(u8),
}

impl PayloadKind {
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(PayloadKind::Jpeg)
        } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            Some(PayloadKind::Png)
        } else if data.starts_with(b"BM") {
            Some(PayloadKind::Bmp)
        } else {
            Some(PayloadKind::Unknown(data[0]))
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            PayloadKind::Jpeg => "jpg",
            PayloadKind::Png => "png",
            PayloadKind::Bmp => "bmp",
            PayloadKind::Unknown(_) => "bin",
        }
    }
}

/// Parsed 24-byte cache file header.
#[derive(Debug, Clone)]
pub struct CacheHeader {
    pub version: FormatVersion,
    pub bucket: CacheBucket,
    pub first_entry_offset: u32,
    pub first_available_offset: u32,
    pub entry_count: u32,
}

/// One parsed cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Absolute file offset the entry starts at
    pub offset: u64,
    pub entry_size: u32,
    /// 64-bit Thumb Cache ID
    pub cache_id: u64,
    /// Original extension, Vista/7 generations only
    pub extension: Option<String>,
    /// Declared geometry, Windows 8+ generations only
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Identifier string: hex rendition of the cache id
    pub identifier: String,
    /// Recognized payload format; `None` for dormant entries
    pub kind: Option<PayloadKind>,
    pub data: Vec<u8>,
    /// Best-effort CRC-64 verification; `None` when there is no payload
    pub data_checksum_ok: Option<bool>,
}

impl CacheEntry {
    pub fn is_dormant(&self) -> bool {
        self.data.is_empty()
    }
}

/// An opened `thumbcache_*.db` file, iterated entry by entry.
#[derive(Debug)]
pub struct CacheFile {
    reader: ByteReader,
    header: CacheHeader,
    cancel: CancelFlag,
    next_offset: u64,
    finished: bool,
}

impl CacheFile {
    pub fn open(mut reader: ByteReader, cancel: CancelFlag) -> Result<Self> {
        let head = reader.read_at(0, CACHE_HEADER_SIZE)?;
        if &head[..4] != CMMM {
            return Err(Error::BadSignature);
        }
        let raw_version = read_u32_le(&head, 4)?;
        let version = FormatVersion::from_raw(raw_version).ok_or_else(|| {
            Error::BadHeader(format!("unknown thumbcache format version {raw_version}"))
        })?;
        let raw_type = read_u32_le(&head, 8)?;
        let header = CacheHeader {
            version,
            bucket: CacheBucket::from_raw(version, raw_type),
            first_entry_offset: read_u32_le(&head, 12)?,
            first_available_offset: read_u32_le(&head, 16)?,
            entry_count: read_u32_le(&head, 20)?,
        };
        let next_offset = u64::from(header.first_entry_offset.max(CACHE_HEADER_SIZE as u32));
        Ok(CacheFile {
            reader,
            header,
            cancel,
            next_offset,
            finished: false,
        })
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(ByteReader::open(path)?, CancelFlag::new())
    }

    pub fn header(&self) -> &CacheHeader {
        &self.header
    }

    /// Parse the next entry, or `None` at end of file. Framing follows the
    /// declared entry size, which must land exactly on the next `CMMM`
    /// signature or on EOF; anything else stops iteration with a warning.
    pub fn next_entry(&mut self) -> Result<Option<CacheEntry>> {
        self.cancel.check()?;
        if self.finished || self.next_offset >= self.reader.len() {
            return Ok(None);
        }
        let offset = self.next_offset;
        let head = self.reader.read_at_most(offset, ENTRY_HEADER_SIZE)?;
        if head.len() < ENTRY_HEADER_SIZE {
            warn!("trailing {} bytes at offset {offset} are too short for an entry", head.len());
            self.finished = true;
            return Ok(None);
        }
        if &head[..4] != CMMM {
            warn!("expected entry signature at offset {offset}; stopping");
            self.finished = true;
            return Ok(None);
        }

        let entry_size = read_u32_le(&head, 4)?;
        if (entry_size as usize) < ENTRY_HEADER_SIZE {
            warn!("entry at offset {offset} declares impossible size {entry_size}; stopping");
            self.finished = true;
            return Ok(None);
        }
        let cache_id = read_u64_le(&head, 8)?;

        let (extension, width, height, id_size, pad_size, data_size) =
            if self.header.version.has_extension_field() {
                let ext = utf16le_to_string(&head[16..24]);
                let id_size = read_u32_le(&head, 24)?;
                let pad_size = read_u32_le(&head, 28)?;
                let data_size = read_u32_le(&head, 32)?;
                // 36..40 unknown
                let ext = (!ext.is_empty()).then_some(ext);
                (ext, None, None, id_size, pad_size, data_size)
            } else {
                let id_size = read_u32_le(&head, 16)?;
                let pad_size = read_u32_le(&head, 20)?;
                let data_size = read_u32_le(&head, 24)?;
                let width = read_u32_le(&head, 28)?;
                let height = read_u32_le(&head, 32)?;
                // 36..40 unknown
                (None, Some(width), Some(height), id_size, pad_size, data_size)
            };
        let data_checksum = read_u64_le(&head, 40)?;
        // 48..56: header checksum, covered by the same best-effort policy
        let header_checksum = read_u64_le(&head, 48)?;

        let declared = ENTRY_HEADER_SIZE as u64 + u64::from(id_size) + u64::from(pad_size)
            + u64::from(data_size);
        if declared > u64::from(entry_size) {
            warn!(
                "entry 0x{cache_id:016x} declares {declared} bytes inside an entry of {entry_size}; stopping"
            );
            self.finished = true;
            return Ok(None);
        }

        let id_offset = offset + ENTRY_HEADER_SIZE as u64;
        let data_offset = id_offset + u64::from(id_size) + u64::from(pad_size);
        let (id_bytes, data) = match (
            self.reader.read_at(id_offset, id_size as usize),
            self.reader.read_at(data_offset, data_size as usize),
        ) {
            (Ok(id_bytes), Ok(data)) => (id_bytes, data),
            _ => {
                // A cut-off trailing entry is expected on forensic images.
                warn!("entry 0x{cache_id:016x} at offset {offset} is truncated; stopping");
                self.finished = true;
                return Ok(None);
            }
        };
        let identifier = utf16le_to_string(&id_bytes);

        let data_checksum_ok = if data.is_empty() {
            None
        } else {
            let computed = crc_fast::checksum(CrcAlgorithm::Crc64Nvme, &data);
            let ok = computed == data_checksum;
            if !ok {
                warn!(
                    "entry 0x{cache_id:016x}: data checksum mismatch \
                     (stored 0x{data_checksum:016x}, computed 0x{computed:016x})"
                );
            }
            Some(ok)
        };
        verify_header_checksum(&head, cache_id, header_checksum);

        let kind = PayloadKind::sniff(&data);
        if let Some(PayloadKind::Unknown(first)) = kind {
            debug!("entry 0x{cache_id:016x}: unrecognized payload magic 0x{first:02x}");
        }

        self.next_offset = offset + u64::from(entry_size);
        Ok(Some(CacheEntry {
            offset,
            entry_size,
            cache_id,
            extension,
            width,
            height,
            identifier,
            kind,
            data,
            data_checksum_ok,
        }))
    }

    /// Parse every remaining entry in file order.
    pub fn read_entries(&mut self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Best-effort verification of the header checksum: CRC-64 over the fixed
/// header up to the checksum field itself.
fn verify_header_checksum(head: &[u8], cache_id: u64, stored: u64) {
    let computed = crc_fast::checksum(CrcAlgorithm::Crc64Nvme, &head[..48]);
    if computed != stored {
        debug!(
            "entry 0x{cache_id:016x}: header checksum mismatch \
             (stored 0x{stored:016x}, computed 0x{computed:016x})"
        );
    }
}

/// Check whether leading bytes look like a thumbcache entry file.
pub fn is_cmmm_signature(data: &[u8]) -> bool {
    data.len() >= 4 && &data[..4] == CMMM
}
