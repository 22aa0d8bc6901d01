//! OLE Compound File header parsing.
use super::consts::*;
use crate::common::binary::{read_u16_le, read_u32_le};
use crate::common::error::{Error, Result};
use crate::common::reader::ByteReader;
use log::warn;

/// Parsed and validated 512-byte compound file header.
#[derive(Debug, Clone)]
pub struct OleHeader {
    pub minor_version: u16,
    pub major_version: u16,
    /// Normal sector size, `1 << sector_shift` (512 for v3, 4096 for v4)
    pub sector_size: usize,
    /// Mini sector size, `1 << mini_sector_shift` (64)
    pub mini_sector_size: usize,
    pub num_dir_sectors: u32,
    pub num_fat_sectors: u32,
    pub first_dir_sector: u32,
    pub mini_stream_cutoff: u32,
    pub first_minifat_sector: u32,
    pub num_minifat_sectors: u32,
    pub first_difat_sector: u32,
    pub num_difat_sectors: u32,
    /// The 109 DIFAT entries stored inline in the header
    pub difat: Vec<u32>,
}

impl OleHeader {
    /// Read and validate the header at offset 0 of `reader`.
    ///
    /// Recognizes both the normal signature and the bit-inverted family; in
    /// the latter case the reader is switched to XOR-0xFF decoding before
    /// any further byte is interpreted.
    pub fn parse(reader: &mut ByteReader) -> Result<Self> {
        if reader.len() < MINIMAL_OLEFILE_SIZE as u64 {
            return Err(Error::BadHeader(format!(
                "file too small for a compound file: {} bytes",
                reader.len()
            )));
        }

        let mut signature = [0u8; 8];
        reader.read_exact_at(0, &mut signature)?;
        match &signature {
            m if m == MAGIC => {}
            m if m == MAGIC_INVERTED => reader.set_inverted(true),
            _ => return Err(Error::BadSignature),
        }

        // Remainder of the header, decoded through the (possibly inverted)
        // reader. Offsets below are absolute file offsets.
        let rest = reader.read_at(8, HEADER_SIZE - 8)?;
        let at = |absolute: usize| absolute - 8;

        if rest[at(8)..at(24)].iter().any(|&b| b != 0) {
            return Err(Error::BadHeader("non-zero header CLSID".into()));
        }

        let minor_version = read_u16_le(&rest, at(0x18))?;
        let major_version = read_u16_le(&rest, at(0x1A))?;
        if major_version != 3 && major_version != 4 {
            return Err(Error::BadHeader(format!(
                "unsupported major version {major_version}"
            )));
        }

        let byte_order = read_u16_le(&rest, at(0x1C))?;
        if byte_order != 0xFFFE {
            return Err(Error::BadHeader(format!(
                "bad byte-order mark 0x{byte_order:04X}"
            )));
        }

        let sector_shift = read_u16_le(&rest, at(0x1E))?;
        match (major_version, sector_shift) {
            (3, 9) | (4, 12) => {}
            _ => {
                return Err(Error::BadHeader(format!(
                    "sector shift {sector_shift} invalid for version {major_version}"
                )));
            }
        }
        let mini_sector_shift = read_u16_le(&rest, at(0x20))?;
        if mini_sector_shift != 6 {
            return Err(Error::BadHeader(format!(
                "mini sector shift {mini_sector_shift}, expected 6"
            )));
        }

        if rest[at(0x22)..at(0x28)].iter().any(|&b| b != 0) {
            warn!("compound file header has non-zero reserved bytes");
        }

        let num_dir_sectors = read_u32_le(&rest, at(0x28))?;
        let num_fat_sectors = read_u32_le(&rest, at(0x2C))?;
        let first_dir_sector = read_u32_le(&rest, at(0x30))?;
        // 0x34: transaction signature, ignored
        let mini_stream_cutoff = read_u32_le(&rest, at(0x38))?;
        if mini_stream_cutoff != MINI_STREAM_CUTOFF {
            warn!("unusual mini stream cutoff {mini_stream_cutoff}");
        }
        let first_minifat_sector = read_u32_le(&rest, at(0x3C))?;
        let num_minifat_sectors = read_u32_le(&rest, at(0x40))?;
        let first_difat_sector = read_u32_le(&rest, at(0x44))?;
        let num_difat_sectors = read_u32_le(&rest, at(0x48))?;

        let mut difat = Vec::with_capacity(HEADER_DIFAT_ENTRIES);
        for i in 0..HEADER_DIFAT_ENTRIES {
            difat.push(read_u32_le(&rest, at(0x4C) + i * 4)?);
        }

        Ok(OleHeader {
            minor_version,
            major_version,
            sector_size: 1usize << sector_shift,
            mini_sector_size: 1usize << mini_sector_shift,
            num_dir_sectors,
            num_fat_sectors,
            first_dir_sector,
            mini_stream_cutoff,
            first_minifat_sector,
            num_minifat_sectors,
            first_difat_sector,
            num_difat_sectors,
            difat,
        })
    }

    /// Absolute file offset of a normal sector. Sector 0 starts immediately
    /// after the 512-byte header.
    #[inline]
    pub fn sector_offset(&self, sector: u32) -> u64 {
        HEADER_SIZE as u64 + sector as u64 * self.sector_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::testutil::{minimal_file, write_temp};

    #[test]
    fn parses_minimal_file() {
        let bytes = minimal_file();
        let f = write_temp(&bytes);
        let mut reader = ByteReader::open(f.path()).unwrap();
        let header = OleHeader::parse(&mut reader).unwrap();
        assert_eq!(header.major_version, 3);
        assert_eq!(header.sector_size, 512);
        assert_eq!(header.mini_sector_size, 64);
        assert_eq!(header.mini_stream_cutoff, 4096);
        assert_eq!(header.sector_offset(0), 512);
        assert_eq!(header.sector_offset(2), 512 + 1024);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = minimal_file();
        bytes[0] = 0x00;
        let f = write_temp(&bytes);
        let mut reader = ByteReader::open(f.path()).unwrap();
        assert!(matches!(
            OleHeader::parse(&mut reader),
            Err(Error::BadSignature)
        ));
    }

    #[test]
    fn rejects_bad_sector_shift() {
        let mut bytes = minimal_file();
        bytes[0x1E] = 10;
        let f = write_temp(&bytes);
        let mut reader = ByteReader::open(f.path()).unwrap();
        assert!(matches!(
            OleHeader::parse(&mut reader),
            Err(Error::BadHeader(_))
        ));
    }

    #[test]
    fn accepts_inverted_signature() {
        let bytes = minimal_file();
        let mut inverted: Vec<u8> = bytes.iter().map(|b| b ^ 0xFF).collect();
        inverted[..8].copy_from_slice(super::MAGIC_INVERTED);
        let f = write_temp(&inverted);
        let mut reader = ByteReader::open(f.path()).unwrap();
        let header = OleHeader::parse(&mut reader).unwrap();
        assert!(reader.is_inverted());
        assert_eq!(header.sector_size, 512);
    }
}
