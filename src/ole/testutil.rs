//! Synthetic compound-file builder for tests.
//!
//! Produces small but structurally honest OLE containers: real FAT chains,
//! a ministream for small streams, and a balanced directory tree, so the
//! reader is exercised the same way a genuine Thumbs.db exercises it.
use super::consts::*;
use std::io::Write;

const SS: usize = 512;
const MSS: usize = 64;

pub struct OleBuilder {
    streams: Vec<(String, Vec<u8>)>,
}

impl OleBuilder {
    pub fn new() -> Self {
        OleBuilder {
            streams: Vec::new(),
        }
    }

    pub fn stream(mut self, name: &str, data: &[u8]) -> Self {
        self.streams.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let small: Vec<usize> = (0..self.streams.len())
            .filter(|&i| self.streams[i].1.len() < MINI_STREAM_CUTOFF as usize)
            .collect();
        let big: Vec<usize> = (0..self.streams.len())
            .filter(|&i| self.streams[i].1.len() >= MINI_STREAM_CUTOFF as usize)
            .collect();

        // Ministream assembly: each small stream padded to a mini-sector
        // boundary, miniFAT chains running in parallel.
        let mut ministream = Vec::new();
        let mut minifat: Vec<u32> = Vec::new();
        let mut mini_start = vec![ENDOFCHAIN; self.streams.len()];
        for &i in &small {
            let data = &self.streams[i].1;
            let first = (ministream.len() / MSS) as u32;
            mini_start[i] = first;
            let mini_sectors = data.len().div_ceil(MSS).max(1);
            ministream.extend_from_slice(data);
            while ministream.len() % MSS != 0 || ministream.len() / MSS < first as usize + mini_sectors
            {
                ministream.push(0);
            }
            for k in 0..mini_sectors {
                if k + 1 < mini_sectors {
                    minifat.push(first + k as u32 + 1);
                } else {
                    minifat.push(ENDOFCHAIN);
                }
            }
        }
        while minifat.len() % (SS / 4) != 0 || (minifat.is_empty() && !small.is_empty()) {
            minifat.push(FREESECT);
        }

        let dir_count = 1 + self.streams.len();
        let dir_sectors = dir_count.div_ceil(SS / DIRENTRY_SIZE);
        let minifat_sectors = minifat.len() / (SS / 4);
        let ministream_sectors = ministream.len().div_ceil(SS);
        let big_sectors: Vec<usize> = big
            .iter()
            .map(|&i| self.streams[i].1.len().div_ceil(SS))
            .collect();
        let non_fat: usize =
            dir_sectors + minifat_sectors + ministream_sectors + big_sectors.iter().sum::<usize>();

        let mut fat_sectors = 1usize;
        while fat_sectors * (SS / 4) < fat_sectors + non_fat {
            fat_sectors += 1;
        }
        assert!(fat_sectors <= HEADER_DIFAT_ENTRIES, "test container too large");

        // Sector map: FAT, directory, miniFAT, ministream, big streams.
        let dir_base = fat_sectors as u32;
        let minifat_base = dir_base + dir_sectors as u32;
        let ministream_base = minifat_base + minifat_sectors as u32;
        let mut next_big = ministream_base + ministream_sectors as u32;
        let mut big_start = vec![ENDOFCHAIN; self.streams.len()];
        for (&i, &sectors) in big.iter().zip(&big_sectors) {
            big_start[i] = next_big;
            next_big += sectors as u32;
        }
        let total_sectors = next_big as usize;

        let mut fat = vec![FREESECT; fat_sectors * (SS / 4)];
        for entry in fat.iter_mut().take(fat_sectors) {
            *entry = FATSECT;
        }
        let chain = |fat: &mut Vec<u32>, base: u32, len: usize| {
            for k in 0..len {
                fat[base as usize + k] = if k + 1 < len {
                    base + k as u32 + 1
                } else {
                    ENDOFCHAIN
                };
            }
        };
        chain(&mut fat, dir_base, dir_sectors);
        if minifat_sectors > 0 {
            chain(&mut fat, minifat_base, minifat_sectors);
        }
        if ministream_sectors > 0 {
            chain(&mut fat, ministream_base, ministream_sectors);
        }
        for (&i, &sectors) in big.iter().zip(&big_sectors) {
            chain(&mut fat, big_start[i], sectors);
        }

        // Balanced directory tree over compound-file name order.
        let mut order: Vec<usize> = (0..self.streams.len()).collect();
        order.sort_by(|&a, &b| {
            let ka: Vec<u16> = self.streams[a].0.encode_utf16().collect();
            let kb: Vec<u16> = self.streams[b].0.encode_utf16().collect();
            ka.len().cmp(&kb.len()).then_with(|| ka.cmp(&kb))
        });
        let mut left = vec![NOSTREAM; self.streams.len()];
        let mut right = vec![NOSTREAM; self.streams.len()];
        let root_child = build_bst(&order, &mut left, &mut right);

        let mut out = Vec::with_capacity(HEADER_SIZE + total_sectors * SS);
        out.extend_from_slice(&header_bytes(
            fat_sectors as u32,
            dir_base,
            if minifat_sectors > 0 {
                minifat_base
            } else {
                ENDOFCHAIN
            },
            minifat_sectors as u32,
        ));

        for entry in &fat {
            out.extend_from_slice(&entry.to_le_bytes());
        }

        // Directory sectors
        let mut dir = Vec::with_capacity(dir_sectors * SS);
        dir.extend_from_slice(&dir_entry_bytes(
            ROOT_ENTRY_NAME,
            STGTY_ROOT,
            NOSTREAM,
            NOSTREAM,
            root_child,
            if ministream_sectors > 0 {
                ministream_base
            } else {
                ENDOFCHAIN
            },
            ministream.len() as u64,
        ));
        for (i, (name, data)) in self.streams.iter().enumerate() {
            let start = if big_start[i] != ENDOFCHAIN {
                big_start[i]
            } else {
                mini_start[i]
            };
            dir.extend_from_slice(&dir_entry_bytes(
                name,
                STGTY_STREAM,
                left[i],
                right[i],
                NOSTREAM,
                start,
                data.len() as u64,
            ));
        }
        dir.resize(dir_sectors * SS, 0);
        out.extend_from_slice(&dir);

        for entry in &minifat {
            out.extend_from_slice(&entry.to_le_bytes());
        }
        let mut mini_padded = ministream.clone();
        mini_padded.resize(ministream_sectors * SS, 0);
        out.extend_from_slice(&mini_padded);

        for (&i, &sectors) in big.iter().zip(&big_sectors) {
            let mut data = self.streams[i].1.clone();
            data.resize(sectors * SS, 0);
            out.extend_from_slice(&data);
        }

        assert_eq!(out.len(), HEADER_SIZE + total_sectors * SS);
        out
    }
}

/// Recursively wire a balanced BST, returning the subtree root's SID.
fn build_bst(order: &[usize], left: &mut [u32], right: &mut [u32]) -> u32 {
    if order.is_empty() {
        return NOSTREAM;
    }
    let mid = order.len() / 2;
    let node = order[mid];
    left[node] = build_bst(&order[..mid], left, right);
    right[node] = build_bst(&order[mid + 1..], left, right);
    // SIDs are offset by one for the root entry.
    node as u32 + 1
}

fn header_bytes(num_fat: u32, first_dir: u32, first_minifat: u32, num_minifat: u32) -> [u8; 512] {
    let mut h = [0u8; 512];
    h[..8].copy_from_slice(MAGIC);
    h[0x18..0x1A].copy_from_slice(&0x003Eu16.to_le_bytes());
    h[0x1A..0x1C].copy_from_slice(&3u16.to_le_bytes());
    h[0x1C..0x1E].copy_from_slice(&0xFFFEu16.to_le_bytes());
    h[0x1E..0x20].copy_from_slice(&9u16.to_le_bytes());
    h[0x20..0x22].copy_from_slice(&6u16.to_le_bytes());
    h[0x2C..0x30].copy_from_slice(&num_fat.to_le_bytes());
    h[0x30..0x34].copy_from_slice(&first_dir.to_le_bytes());
    h[0x38..0x3C].copy_from_slice(&MINI_STREAM_CUTOFF.to_le_bytes());
    h[0x3C..0x40].copy_from_slice(&first_minifat.to_le_bytes());
    h[0x40..0x44].copy_from_slice(&num_minifat.to_le_bytes());
    h[0x44..0x48].copy_from_slice(&ENDOFCHAIN.to_le_bytes());
    h[0x48..0x4C].copy_from_slice(&0u32.to_le_bytes());
    for i in 0..HEADER_DIFAT_ENTRIES {
        let entry = if (i as u32) < num_fat { i as u32 } else { FREESECT };
        h[0x4C + i * 4..0x4C + i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
    }
    h
}

fn dir_entry_bytes(
    name: &str,
    entry_type: u8,
    left: u32,
    right: u32,
    child: u32,
    start: u32,
    size: u64,
) -> [u8; 128] {
    let mut e = [0u8; 128];
    let units: Vec<u16> = name.encode_utf16().collect();
    assert!(units.len() <= 31);
    for (i, unit) in units.iter().enumerate() {
        e[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    e[64..66].copy_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
    e[66] = entry_type;
    e[67] = 1; // black
    e[68..72].copy_from_slice(&left.to_le_bytes());
    e[72..76].copy_from_slice(&right.to_le_bytes());
    e[76..80].copy_from_slice(&child.to_le_bytes());
    e[116..120].copy_from_slice(&start.to_le_bytes());
    e[120..128].copy_from_slice(&size.to_le_bytes());
    e
}

/// An empty container: header, FAT, directory with a lone Root entry.
pub fn minimal_file() -> Vec<u8> {
    OleBuilder::new().build()
}

pub fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}
