//! Random-access view over an input file.
//!
//! All container parsing goes through positioned reads on this reader; the
//! file is never slurped whole. The reader exclusively owns the handle for
//! the lifetime of one input parse and releases it on drop.
use crate::common::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Bounds-checked positioned reader over a single input file.
pub struct ByteReader {
    file: File,
    len: u64,
    /// When set, every byte read is XOR 0xFF. Used for the bit-inverted
    /// OLE signature family.
    inverted: bool,
}

impl ByteReader {
    /// Open an input file and record its length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(ByteReader {
            file,
            len,
            inverted: false,
        })
    }

    /// Total input length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Enable or disable XOR-0xFF decoding of all subsequent reads.
    pub fn set_inverted(&mut self, inverted: bool) {
        self.inverted = inverted;
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(Error::Truncated {
                offset,
                wanted: buf.len(),
            })?;
        if end > self.len {
            return Err(Error::Truncated {
                offset,
                wanted: buf.len(),
            });
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        if self.inverted {
            for b in buf.iter_mut() {
                *b ^= 0xFF;
            }
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` into a fresh buffer.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read up to `len` bytes at `offset`, clamped to the file length.
    ///
    /// Used for signature sniffing where a short file is an answer, not an
    /// error.
    pub fn read_at_most(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset >= self.len {
            return Ok(Vec::new());
        }
        let available = (self.len - offset).min(len as u64) as usize;
        self.read_at(offset, available)
    }
}

impl std::fmt::Debug for ByteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteReader")
            .field("len", &self.len)
            .field("inverted", &self.inverted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn positioned_reads() {
        let f = temp_with(&[0u8, 1, 2, 3, 4, 5, 6, 7]);
        let mut r = ByteReader::open(f.path()).unwrap();
        assert_eq!(r.len(), 8);
        assert_eq!(r.read_at(2, 3).unwrap(), vec![2, 3, 4]);
        assert_eq!(r.read_at(0, 1).unwrap(), vec![0]);
        assert!(r.read_at(6, 4).is_err());
    }

    #[test]
    fn inverted_reads_xor_every_byte() {
        let f = temp_with(&[0x00, 0xFF, 0x0F]);
        let mut r = ByteReader::open(f.path()).unwrap();
        r.set_inverted(true);
        assert_eq!(r.read_at(0, 3).unwrap(), vec![0xFF, 0x00, 0xF0]);
    }

    #[test]
    fn read_at_most_clamps() {
        let f = temp_with(&[1u8, 2, 3]);
        let mut r = ByteReader::open(f.path()).unwrap();
        assert_eq!(r.read_at_most(1, 16).unwrap(), vec![2, 3]);
        assert_eq!(r.read_at_most(5, 16).unwrap(), Vec::<u8>::new());
    }
}
