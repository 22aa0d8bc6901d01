//! Thumbs.db thumbnail stream decoding.
//!
//! Two header generations exist, distinguished by the leading u32. The
//! older one (12-byte first header) prefixes both the proprietary Type 1
//! "YMCA" payload and plain JFIF payloads; the newer 24-byte header always
//! wraps a plain JFIF.
use super::jfif;
use crate::common::binary::{read_u32_le, slice_at};
use crate::common::error::{Error, Result};

/// Leading header length of the two recognized stream generations.
const HEADER1_LEGACY: u32 = 0x0C;
const HEADER1_MODERN: u32 = 0x18;
/// Second header length in the legacy generation.
const HEADER2_LEGACY: usize = 0x10;

/// JPEG start-of-image / end-of-image markers.
pub(crate) const SOI: [u8; 2] = [0xFF, 0xD8];
pub(crate) const EOI: [u8; 2] = [0xFF, 0xD9];

/// A decoded thumbnail stream: final JPEG bytes plus declared geometry.
#[derive(Debug, Clone)]
pub struct ThumbStream {
    /// Declared width; zero when the header does not carry geometry.
    pub width: u32,
    pub height: u32,
    /// True when the payload went through Type 1 reconstruction.
    pub reconstructed: bool,
    /// A complete JFIF byte sequence.
    pub jpeg: Vec<u8>,
}

/// Decode one non-Catalog stream into a JPEG.
pub fn decode(data: &[u8]) -> Result<ThumbStream> {
    let header1 = read_u32_le(data, 0)?;
    match header1 {
        HEADER1_LEGACY => decode_legacy(data),
        HEADER1_MODERN => decode_modern(data),
        other => Err(Error::UnknownEntryType(format!(
            "unrecognized stream header length 0x{other:X}"
        ))),
    }
}

/// Legacy generation: 12-byte first header, 16-byte second header at
/// offset 0x0C declaring `{type, width, height, payload_length}`.
fn decode_legacy(data: &[u8]) -> Result<ThumbStream> {
    let header2_len = read_u32_le(data, 4)? as usize;
    if header2_len != HEADER2_LEGACY {
        return Err(Error::UnknownEntryType(format!(
            "unexpected second header length 0x{header2_len:X}"
        )));
    }
    let entry_type = read_u32_le(data, 0x0C)?;
    let width = read_u32_le(data, 0x10)?;
    let height = read_u32_le(data, 0x14)?;
    let payload_len = read_u32_le(data, 0x18)? as usize;

    let header_total = HEADER1_LEGACY as usize + HEADER2_LEGACY;
    check_payload_len(payload_len, header_total, data.len())?;
    let payload = slice_at(data, header_total, payload_len)?;

    match entry_type {
        1 => Ok(ThumbStream {
            width,
            height,
            reconstructed: true,
            jpeg: jfif::reconstruct(payload, width, height),
        }),
        2 => Ok(ThumbStream {
            width,
            height,
            reconstructed: false,
            jpeg: validated_jfif(payload)?.to_vec(),
        }),
        other => Err(Error::UnknownEntryType(format!(
            "stream entry type {other}"
        ))),
    }
}

/// Modern generation: single 24-byte header, always a plain JFIF payload.
fn decode_modern(data: &[u8]) -> Result<ThumbStream> {
    let width = read_u32_le(data, 0x08)?;
    let height = read_u32_le(data, 0x0C)?;
    let payload_len = read_u32_le(data, 0x10)? as usize;
    // 0x14: payload checksum, not verified

    let header_total = HEADER1_MODERN as usize;
    check_payload_len(payload_len, header_total, data.len())?;
    let payload = slice_at(data, header_total, payload_len)?;

    Ok(ThumbStream {
        width,
        height,
        reconstructed: false,
        jpeg: validated_jfif(payload)?.to_vec(),
    })
}

/// The declared payload must account for every byte after the headers.
fn check_payload_len(payload_len: usize, header_total: usize, stream_len: usize) -> Result<()> {
    let actual = stream_len.saturating_sub(header_total);
    if payload_len != actual {
        return Err(Error::EntryLengthMismatch {
            declared: payload_len as u64,
            actual: actual as u64,
        });
    }
    Ok(())
}

/// Validate SOI and terminal EOI on a plain JFIF payload.
fn validated_jfif(payload: &[u8]) -> Result<&[u8]> {
    if payload.len() < 4 || payload[..2] != SOI {
        return Err(Error::UnknownEntryType("payload is not a JFIF".into()));
    }
    if payload[payload.len() - 2..] != EOI {
        return Err(Error::MissingEoi);
    }
    Ok(payload)
}

#[cfg(test)]
pub(crate) fn build_legacy_stream(entry_type: u32, width: u32, height: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&HEADER1_LEGACY.to_le_bytes());
    data.extend_from_slice(&(HEADER2_LEGACY as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&entry_type.to_le_bytes());
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(payload);
    data
}

#[cfg(test)]
pub(crate) fn build_modern_stream(width: u32, height: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&HEADER1_MODERN.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes()); // checksum
    data.extend_from_slice(payload);
    data
}

/// A tiny but marker-complete JFIF byte sequence for tests.
#[cfg(test)]
pub(crate) fn tiny_jfif(filler: usize) -> Vec<u8> {
    let mut jpeg = vec![0xFF, 0xD8];
    jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    jpeg.extend_from_slice(b"JFIF\0");
    jpeg.extend_from_slice(&[0x01, 0x01, 0x01, 0x00, 0x60, 0x00, 0x60, 0x00, 0x00]);
    jpeg.extend(std::iter::repeat_n(0x00u8, filler));
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}
