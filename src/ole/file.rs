//! OLE Compound File reader: FAT, DIFAT, miniFAT, directory tree and
//! stream assembly.
use super::consts::*;
use super::header::OleHeader;
use crate::common::binary::read_u32_le;
use crate::common::cancel::CancelFlag;
use crate::common::error::{Error, Result};
use crate::common::reader::ByteReader;
use crate::common::time;
use chrono::{DateTime, Utc};
use fixedbitset::FixedBitSet;
use log::warn;
use std::cmp::Ordering;
use std::path::Path;
use zerocopy::{FromBytes, LE, U16, U32, U64};
use zerocopy_derive::FromBytes as DeriveFromBytes;

/// Raw OLE directory entry structure (128 bytes), on-disk layout.
#[derive(Debug, Clone, DeriveFromBytes)]
#[repr(C)]
struct RawDirectoryEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    node_color: u8,
    sid_left: U32<LE>,
    sid_right: U32<LE>,
    sid_child: U32<LE>,
    clsid: [u8; 16],
    state_bits: U32<LE>,
    creation_time: U64<LE>,
    modified_time: U64<LE>,
    start_sector: U32<LE>,
    stream_size: U64<LE>,
}

/// The five documented directory entry types plus a closed escape hatch
/// for anything else a damaged file may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryType {
    Empty,
    Storage,
    Stream,
    LockBytes,
    Property,
    Root,
    Unknown(u8),
}

impl From<u8> for DirEntryType {
    fn from(value: u8) -> Self {
        match value {
            STGTY_EMPTY => DirEntryType::Empty,
            STGTY_STORAGE => DirEntryType::Storage,
            STGTY_STREAM => DirEntryType::Stream,
            STGTY_LOCKBYTES => DirEntryType::LockBytes,
            STGTY_PROPERTY => DirEntryType::Property,
            STGTY_ROOT => DirEntryType::Root,
            other => DirEntryType::Unknown(other),
        }
    }
}

/// Red-black tree node color of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeColor {
    Red,
    Black,
    Unknown(u8),
}

impl From<u8> for NodeColor {
    fn from(value: u8) -> Self {
        match value {
            0 => NodeColor::Red,
            1 => NodeColor::Black,
            other => NodeColor::Unknown(other),
        }
    }
}

/// A parsed OLE directory entry.
///
/// Sibling and child links are kept as SID indices into the directory
/// array, never as owning references.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Storage ID (index in directory)
    pub sid: u32,
    /// Entry name decoded from UTF-16LE
    pub name: String,
    /// Raw UTF-16 code units, kept for tree-order comparisons
    pub(crate) name_utf16: Vec<u16>,
    pub entry_type: DirEntryType,
    pub color: NodeColor,
    pub left: u32,
    pub right: u32,
    pub child: u32,
    pub clsid: [u8; 16],
    pub state_bits: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// First sector of the stream (head of the ministream for Root)
    pub start_sector: u32,
    /// Stream size in bytes (ministream length for Root)
    pub size: u64,
}

impl DirEntry {
    pub fn is_stream(&self) -> bool {
        self.entry_type == DirEntryType::Stream
    }
}

/// An opened OLE Compound File.
///
/// Owns the underlying reader and the FAT/miniFAT/directory arrays;
/// downstream decoders receive assembled stream bytes.
#[derive(Debug)]
pub struct OleFile {
    reader: ByteReader,
    header: OleHeader,
    /// Maps sector to next sector in chain
    fat: Vec<u32>,
    /// Mini FAT, for streams smaller than the cutoff
    minifat: Vec<u32>,
    entries: Vec<DirEntry>,
    /// Ministream data, loaded on first small-stream read
    ministream: Option<Vec<u8>>,
    cancel: CancelFlag,
}

impl OleFile {
    /// Open and parse a compound file from an already-opened reader.
    pub fn open(mut reader: ByteReader, cancel: CancelFlag) -> Result<Self> {
        let header = OleHeader::parse(&mut reader)?;

        let mut ole = OleFile {
            reader,
            header,
            fat: Vec::new(),
            minifat: Vec::new(),
            entries: Vec::new(),
            ministream: None,
            cancel,
        };
        ole.load_fat()?;
        ole.load_minifat()?;
        ole.load_directory()?;
        Ok(ole)
    }

    /// Open a compound file at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(ByteReader::open(path)?, CancelFlag::new())
    }

    pub fn header(&self) -> &OleHeader {
        &self.header
    }

    /// All directory entries in SID order, Empty slots included.
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// The root storage entry.
    pub fn root(&self) -> &DirEntry {
        &self.entries[0]
    }

    /// Highest sector index that fits inside the file.
    fn sector_count(&self) -> u64 {
        (self.reader.len().saturating_sub(HEADER_SIZE as u64)) / self.header.sector_size as u64
    }

    /// Read a single normal sector.
    fn read_sector(&mut self, sector: u32) -> Result<Vec<u8>> {
        if u64::from(sector) >= self.sector_count() {
            return Err(Error::CorruptChain(format!(
                "sector {sector} out of range"
            )));
        }
        let offset = self.header.sector_offset(sector);
        self.reader.read_at(offset, self.header.sector_size)
    }

    /// Build the FAT by following the DIFAT: 109 inline entries, then
    /// chained DIFAT sectors linked through each sector's last dword.
    fn load_fat(&mut self) -> Result<()> {
        let mut fat_sectors: Vec<u32> = Vec::new();
        for &entry in &self.header.difat {
            if entry == FREESECT || entry == ENDOFCHAIN {
                break;
            }
            fat_sectors.push(entry);
        }

        let entries_per_difat = self.header.sector_size / 4 - 1;
        let mut difat_sector = self.header.first_difat_sector;
        let mut visited = FixedBitSet::with_capacity(self.sector_count() as usize);
        while difat_sector != ENDOFCHAIN && difat_sector != FREESECT {
            if u64::from(difat_sector) >= self.sector_count() {
                return Err(Error::CorruptChain(format!(
                    "DIFAT sector {difat_sector} out of range"
                )));
            }
            if visited.contains(difat_sector as usize) {
                return Err(Error::CorruptChain("DIFAT chain cycle".into()));
            }
            visited.insert(difat_sector as usize);

            let sector_data = self.read_sector(difat_sector)?;
            for i in 0..entries_per_difat {
                let entry = read_u32_le(&sector_data, i * 4)?;
                if entry == FREESECT || entry == ENDOFCHAIN {
                    break;
                }
                fat_sectors.push(entry);
            }
            difat_sector = read_u32_le(&sector_data, entries_per_difat * 4)?;
        }

        if fat_sectors.len() as u32 != self.header.num_fat_sectors {
            warn!(
                "header declares {} FAT sectors, DIFAT yields {}",
                self.header.num_fat_sectors,
                fat_sectors.len()
            );
        }

        self.fat = Vec::with_capacity(fat_sectors.len() * (self.header.sector_size / 4));
        for &sector in &fat_sectors {
            let sector_data = self.read_sector(sector)?;
            for chunk in sector_data.chunks_exact(4) {
                let entry = U32::<LE>::read_from_bytes(chunk)
                    .map(|v| v.get())
                    .unwrap_or(FREESECT);
                self.fat.push(entry);
            }
        }
        Ok(())
    }

    /// Build the miniFAT by walking its own chain through the main FAT.
    fn load_minifat(&mut self) -> Result<()> {
        if self.header.num_minifat_sectors == 0
            || self.header.first_minifat_sector == ENDOFCHAIN
            || self.header.first_minifat_sector == FREESECT
        {
            return Ok(());
        }
        let sectors = follow_chain(self.header.first_minifat_sector, &self.fat, "miniFAT")?;
        self.minifat = Vec::with_capacity(sectors.len() * (self.header.sector_size / 4));
        for &sector in &sectors {
            let sector_data = self.read_sector(sector)?;
            for chunk in sector_data.chunks_exact(4) {
                let entry = U32::<LE>::read_from_bytes(chunk)
                    .map(|v| v.get())
                    .unwrap_or(FREESECT);
                self.minifat.push(entry);
            }
        }
        Ok(())
    }

    /// Walk the directory chain and parse every 128-byte entry in SID
    /// order. Entry 0 must be the Root.
    fn load_directory(&mut self) -> Result<()> {
        let sectors = follow_chain(self.header.first_dir_sector, &self.fat, "directory")?;
        let per_sector = self.header.sector_size / DIRENTRY_SIZE;
        let mut entries = Vec::with_capacity(sectors.len() * per_sector);
        for &sector in &sectors {
            let sector_data = self.read_sector(sector)?;
            for chunk in sector_data.chunks_exact(DIRENTRY_SIZE) {
                entries.push(self.parse_directory_entry(chunk, entries.len() as u32)?);
            }
        }

        if entries.is_empty() {
            return Err(Error::BadDirectory("empty directory".into()));
        }
        let root = &entries[0];
        if root.entry_type != DirEntryType::Root {
            return Err(Error::BadDirectory(format!(
                "entry 0 has type {:?}, expected Root",
                root.entry_type
            )));
        }
        if root.name != ROOT_ENTRY_NAME {
            warn!("root entry named {:?}, expected {:?}", root.name, ROOT_ENTRY_NAME);
        }

        self.entries = entries;
        Ok(())
    }

    fn parse_directory_entry(&self, data: &[u8], sid: u32) -> Result<DirEntry> {
        let raw = RawDirectoryEntry::read_from_bytes(data)
            .map_err(|_| Error::BadDirectory(format!("entry {sid} short")))?;

        let entry_type = DirEntryType::from(raw.entry_type);
        let name_len = raw.name_len.get() as usize;
        let (name, name_utf16) = if entry_type == DirEntryType::Empty && name_len == 0 {
            (String::new(), Vec::new())
        } else {
            if name_len < 2 || name_len > 64 || name_len % 2 != 0 {
                return Err(Error::BadDirectory(format!(
                    "entry {sid} name length {name_len}"
                )));
            }
            // Length includes the NUL terminator.
            let units: Vec<u16> = raw.name[..name_len - 2]
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            (String::from_utf16_lossy(&units), units)
        };

        // 512-byte-sector files only use the low 32 bits of the size field.
        let size = if self.header.sector_size == 512 {
            raw.stream_size.get() & 0xFFFF_FFFF
        } else {
            raw.stream_size.get()
        };

        Ok(DirEntry {
            sid,
            name,
            name_utf16,
            entry_type,
            color: NodeColor::from(raw.node_color),
            left: raw.sid_left.get(),
            right: raw.sid_right.get(),
            child: raw.sid_child.get(),
            clsid: raw.clsid,
            state_bits: raw.state_bits.get(),
            created: time::filetime_to_utc(raw.creation_time.get()),
            modified: time::filetime_to_utc(raw.modified_time.get()),
            start_sector: raw.start_sector.get(),
            size,
        })
    }

    /// Resolve a stream name by descending the red-black sibling tree from
    /// the Root's child.
    pub fn find_by_name(&self, name: &str) -> Option<&DirEntry> {
        let target: Vec<u16> = name.encode_utf16().collect();
        let mut sid = self.entries.first()?.child;
        // Bounded descent; a malformed tree must not spin forever.
        for _ in 0..=self.entries.len() {
            if sid == NOSTREAM || sid as usize >= self.entries.len() {
                return None;
            }
            let entry = &self.entries[sid as usize];
            match cfb_name_cmp(&target, &entry.name_utf16) {
                Ordering::Equal => return Some(entry),
                Ordering::Less => sid = entry.left,
                Ordering::Greater => sid = entry.right,
            }
        }
        warn!("directory tree descent did not terminate; treating {name:?} as absent");
        None
    }

    /// Read a stream's bytes by directory SID.
    pub fn stream_bytes(&mut self, sid: u32) -> Result<Vec<u8>> {
        self.cancel.check()?;
        let entry = self
            .entries
            .get(sid as usize)
            .ok_or_else(|| Error::BadDirectory(format!("no entry with SID {sid}")))?;
        if !entry.is_stream() {
            return Err(Error::BadDirectory(format!(
                "entry {sid} ({:?}) is not a stream",
                entry.name
            )));
        }
        let (start, size) = (entry.start_sector, entry.size);
        if size < u64::from(self.header.mini_stream_cutoff) {
            self.read_mini_stream(start, size)
        } else {
            self.read_fat_stream(start, size)
        }
    }

    /// Read a stream's bytes by name.
    pub fn stream_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let sid = self
            .find_by_name(name)
            .map(|entry| entry.sid)
            .ok_or_else(|| Error::BadDirectory(format!("stream {name:?} not found")))?;
        self.stream_bytes(sid)
    }

    fn read_fat_stream(&mut self, start: u32, size: u64) -> Result<Vec<u8>> {
        if start == ENDOFCHAIN && size == 0 {
            return Ok(Vec::new());
        }
        let sectors = follow_chain(start, &self.fat, "stream")?;
        let capacity = sectors.len() * self.header.sector_size;
        if (capacity as u64) < size {
            return Err(Error::CorruptChain(format!(
                "chain holds {capacity} bytes, stream declares {size}"
            )));
        }
        let mut data = Vec::with_capacity(capacity);
        for &sector in &sectors {
            data.extend_from_slice(&self.read_sector(sector)?);
        }
        data.truncate(size as usize);
        Ok(data)
    }

    fn read_mini_stream(&mut self, start: u32, size: u64) -> Result<Vec<u8>> {
        if start == ENDOFCHAIN && size == 0 {
            return Ok(Vec::new());
        }
        if self.ministream.is_none() {
            let root = &self.entries[0];
            let (root_start, root_size) = (root.start_sector, root.size);
            let ministream = self.read_fat_stream(root_start, root_size)?;
            self.ministream = Some(ministream);
        }

        let sectors = follow_chain(start, &self.minifat, "mini stream")?;
        let mini = self.header.mini_sector_size;
        let ministream = self.ministream.as_ref().unwrap();
        let mut data = Vec::with_capacity(sectors.len() * mini);
        for &sector in &sectors {
            let offset = sector as usize * mini;
            if offset + mini > ministream.len() {
                return Err(Error::CorruptChain(format!(
                    "mini sector {sector} outside ministream"
                )));
            }
            data.extend_from_slice(&ministream[offset..offset + mini]);
        }
        if (data.len() as u64) < size {
            return Err(Error::CorruptChain(format!(
                "mini chain holds {} bytes, stream declares {size}",
                data.len()
            )));
        }
        data.truncate(size as usize);
        Ok(data)
    }
}

/// Follow a sector chain until `ENDOFCHAIN`, failing on out-of-range
/// indices and on any revisited sector.
fn follow_chain(start: u32, table: &[u32], what: &str) -> Result<Vec<u32>> {
    if start == ENDOFCHAIN {
        return Ok(Vec::new());
    }
    let mut sectors = Vec::new();
    let mut visited = FixedBitSet::with_capacity(table.len());
    let mut sector = start;
    while sector != ENDOFCHAIN {
        if sector as usize >= table.len() {
            return Err(Error::CorruptChain(format!(
                "{what} chain references sector {sector} outside the table"
            )));
        }
        if visited.contains(sector as usize) {
            return Err(Error::CorruptChain(format!(
                "{what} chain revisits sector {sector}"
            )));
        }
        visited.insert(sector as usize);
        sectors.push(sector);
        sector = table[sector as usize];
    }
    Ok(sectors)
}

/// Compound-file name ordering: shorter names first, then by UTF-16 code
/// unit.
fn cfb_name_cmp(a: &[u16], b: &[u16]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::testutil::{OleBuilder, minimal_file, write_temp};

    fn open_bytes(bytes: &[u8]) -> Result<OleFile> {
        let f = write_temp(bytes);
        OleFile::open(ByteReader::open(f.path()).unwrap(), CancelFlag::new())
    }

    #[test]
    fn empty_file_has_only_root() {
        let ole = open_bytes(&minimal_file()).unwrap();
        assert_eq!(ole.root().entry_type, DirEntryType::Root);
        assert_eq!(ole.root().name, "Root Entry");
        assert_eq!(ole.entries().iter().filter(|e| e.is_stream()).count(), 0);
    }

    #[test]
    fn big_stream_round_trips() {
        let payload: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        let bytes = OleBuilder::new().stream("1", &payload).build();
        let mut ole = open_bytes(&bytes).unwrap();
        assert_eq!(ole.stream_by_name("1").unwrap(), payload);
    }

    #[test]
    fn small_stream_reads_through_ministream() {
        let payload = vec![0xABu8; 700];
        let bytes = OleBuilder::new().stream("Catalog", &payload).build();
        let mut ole = open_bytes(&bytes).unwrap();
        assert_eq!(ole.stream_by_name("Catalog").unwrap(), payload);
    }

    #[test]
    fn tree_descent_finds_all_streams() {
        let big: Vec<u8> = vec![1u8; 4096];
        let bytes = OleBuilder::new()
            .stream("1", &big)
            .stream("2", &vec![2u8; 4096])
            .stream("Catalog", &vec![3u8; 200])
            .build();
        let mut ole = open_bytes(&bytes).unwrap();
        for name in ["1", "2", "Catalog"] {
            assert!(ole.stream_by_name(name).is_ok(), "missing {name}");
        }
        assert!(ole.find_by_name("nope").is_none());
    }

    #[test]
    fn fat_cycle_is_corrupt_chain() {
        let payload = vec![9u8; 4096];
        let mut bytes = OleBuilder::new().stream("1", &payload).build();
        // Locate the stream's first FAT entry and loop it onto itself.
        let mut ole = open_bytes(&bytes).unwrap();
        let sid = ole.find_by_name("1").unwrap().sid;
        let start = ole.entries()[sid as usize].start_sector;
        let fat_offset = 512 + start as usize * 4;
        bytes[fat_offset..fat_offset + 4].copy_from_slice(&start.to_le_bytes());
        let mut looped = open_bytes(&bytes).unwrap();
        assert!(matches!(
            looped.stream_by_name("1"),
            Err(Error::CorruptChain(_))
        ));
        // The pristine copy still reads fine.
        assert_eq!(ole.stream_by_name("1").unwrap(), payload);
    }

    #[test]
    fn cancellation_observed_at_stream_boundary() {
        let bytes = OleBuilder::new().stream("1", &vec![0u8; 4096]).build();
        let f = write_temp(&bytes);
        let cancel = CancelFlag::new();
        let mut ole = OleFile::open(ByteReader::open(f.path()).unwrap(), cancel.clone()).unwrap();
        cancel.cancel();
        assert!(matches!(ole.stream_by_name("1"), Err(Error::Cancelled)));
    }

    #[test]
    fn chain_walk_terminates_for_every_entry() {
        let bytes = OleBuilder::new()
            .stream("1", &vec![5u8; 9000])
            .stream("Catalog", &vec![6u8; 150])
            .build();
        let ole = open_bytes(&bytes).unwrap();
        for entry in ole.entries() {
            if entry.is_stream() && entry.size >= 4096 {
                follow_chain(entry.start_sector, &ole.fat, "test").unwrap();
            }
        }
    }
}
