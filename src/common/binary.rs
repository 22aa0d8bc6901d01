//! Bounded little-endian reads and UTF-16LE decoding over byte slices.
//!
//! Every helper is bounds-checked and reports `Error::Truncated` instead of
//! panicking; forensic inputs are routinely cut short.
use crate::common::error::{Error, Result};
use zerocopy::{FromBytes, LE, U16, U32, U64};

/// Read a little-endian u16 from a byte slice at the given offset.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let end = offset.checked_add(2).filter(|&e| e <= data.len());
    match end {
        Some(e) => U16::<LE>::read_from_bytes(&data[offset..e])
            .map(|v| v.get())
            .map_err(|_| truncated(offset, 2)),
        None => Err(truncated(offset, 2)),
    }
}

/// Read a little-endian u32 from a byte slice at the given offset.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let end = offset.checked_add(4).filter(|&e| e <= data.len());
    match end {
        Some(e) => U32::<LE>::read_from_bytes(&data[offset..e])
            .map(|v| v.get())
            .map_err(|_| truncated(offset, 4)),
        None => Err(truncated(offset, 4)),
    }
}

/// Read a little-endian u64 from a byte slice at the given offset.
#[inline]
pub fn read_u64_le(data: &[u8], offset: usize) -> Result<u64> {
    let end = offset.checked_add(8).filter(|&e| e <= data.len());
    match end {
        Some(e) => U64::<LE>::read_from_bytes(&data[offset..e])
            .map(|v| v.get())
            .map_err(|_| truncated(offset, 8)),
        None => Err(truncated(offset, 8)),
    }
}

/// Borrow `len` bytes at `offset`, bounds-checked.
#[inline]
pub fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .filter(|&e| e <= data.len())
        .map(|e| &data[offset..e])
        .ok_or_else(|| truncated(offset, len))
}

#[inline]
fn truncated(offset: usize, wanted: usize) -> Error {
    Error::Truncated {
        offset: offset as u64,
        wanted,
    }
}

/// Decode UTF-16LE bytes to a String, stopping at the first NUL code unit.
///
/// Trailing garbage after the terminator is ignored, which matches how
/// Windows itself treats the fixed-width name fields in these containers.
pub fn utf16le_to_string(bytes: &[u8]) -> String {
    let mut end = bytes.len() & !1;
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        if pair[0] == 0 && pair[1] == 0 {
            end = i * 2;
            break;
        }
    }
    let (decoded, _, _) = encoding_rs::UTF_16LE.decode(&bytes[..end]);
    decoded.into_owned()
}

/// Decode exactly `bytes.len() / 2` UTF-16LE code units, NULs included.
pub fn utf16le_to_string_raw(bytes: &[u8]) -> String {
    let end = bytes.len() & !1;
    let (decoded, _, _) = encoding_rs::UTF_16LE.decode(&bytes[..end]);
    decoded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_integer_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16_le(&data, 0).unwrap(), 0x0201);
        assert_eq!(read_u32_le(&data, 2).unwrap(), 0x06050403);
        assert_eq!(read_u64_le(&data, 0).unwrap(), 0x0807060504030201);
        assert!(read_u32_le(&data, 6).is_err());
        assert!(read_u16_le(&data, usize::MAX).is_err());
    }

    #[test]
    fn slice_bounds() {
        let data = [1u8, 2, 3];
        assert_eq!(slice_at(&data, 1, 2).unwrap(), &[2, 3]);
        assert!(slice_at(&data, 2, 2).is_err());
    }

    #[test]
    fn utf16_nul_termination() {
        // "ab\0junk"
        let bytes = [0x61, 0x00, 0x62, 0x00, 0x00, 0x00, 0x7A, 0x00];
        assert_eq!(utf16le_to_string(&bytes), "ab");
        assert_eq!(utf16le_to_string_raw(&bytes[..4]), "ab");
    }

    #[test]
    fn utf16_odd_length_ignores_dangling_byte() {
        let bytes = [0x61, 0x00, 0x62];
        assert_eq!(utf16le_to_string(&bytes), "a");
    }
}
