//! Extraction pipeline: container dispatch, metadata joining, and
//! emission to an output sink.
//!
//! One pipeline run handles one input file. The container family is
//! recognized from the leading bytes; thumbnails flow to the sink in
//! on-disk order, joined against the Thumbs.db catalog and, when
//! available, the Windows Search property store.
use crate::common::cancel::CancelFlag;
use crate::common::error::{Error, Result};
use crate::common::reader::ByteReader;
use crate::ole::{DirEntryType, OleFile, is_ole_signature};
use crate::thumbcache::{CacheFile, IndexFile, PayloadKind, is_cmmm_signature, is_immm_signature};
use crate::thumbs::{self, Catalog, stream_id_for_name};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::Path;

#[cfg(feature = "esedb")]
use crate::esedb::EsedbView;

/// Container family recognized from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// OLE compound file (Thumbs.db), either signature family
    CompoundFile,
    /// CMMM thumbcache entry file
    Thumbcache,
    /// IMMM thumbcache index
    ThumbcacheIndex,
    Unknown,
}

impl ContainerKind {
    pub fn sniff(leading: &[u8]) -> Self {
        if is_ole_signature(leading) {
            ContainerKind::CompoundFile
        } else if is_cmmm_signature(leading) {
            ContainerKind::Thumbcache
        } else if is_immm_signature(leading) {
            ContainerKind::ThumbcacheIndex
        } else {
            ContainerKind::Unknown
        }
    }
}

/// MIME type of an extracted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Bmp,
}

impl ImageMime {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Bmp => "image/bmp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "jpg",
            ImageMime::Png => "png",
            ImageMime::Bmp => "bmp",
        }
    }

    fn from_payload(kind: PayloadKind) -> Option<Self> {
        match kind {
            PayloadKind::Jpeg => Some(ImageMime::Jpeg),
            PayloadKind::Png => Some(ImageMime::Png),
            PayloadKind::Bmp => Some(ImageMime::Bmp),
            PayloadKind::Unknown(_) => None,
        }
    }
}

/// One recovered thumbnail with whatever metadata the sources yielded.
#[derive(Debug, Clone, Default)]
pub struct Thumbnail {
    /// Thumbs.db stream id, when the source was a compound file
    pub stream_id: Option<u32>,
    /// 64-bit Thumb Cache ID, when the source was a thumbcache
    pub cache_id: Option<u64>,
    /// Original file name recovered from catalog or property store
    pub original_name: Option<String>,
    /// Original full path, property store only
    pub path: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mtime: Option<DateTime<Utc>>,
    /// `None` for dormant entries and unrecognized payloads
    pub mime: Option<ImageMime>,
    pub bytes: Vec<u8>,
}

impl Thumbnail {
    /// Merge rule for independent metadata sources: a later value never
    /// overwrites an earlier non-empty one.
    fn fill_name(&mut self, value: Option<String>) {
        if self.original_name.is_none() {
            self.original_name = value.filter(|v| !v.is_empty());
        }
    }

    fn fill_mtime(&mut self, value: Option<DateTime<Utc>>) {
        if self.mtime.is_none() {
            self.mtime = value;
        }
    }
}

/// Where extracted thumbnails go. The pipeline itself never touches the
/// filesystem; a failing sink aborts the current input.
pub trait ThumbnailSink {
    fn write(&mut self, thumbnail: &Thumbnail) -> Result<()>;
}

/// Sink collecting thumbnails in memory, mainly for tests and callers
/// that post-process.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub thumbnails: Vec<Thumbnail>,
}

impl ThumbnailSink for MemorySink {
    fn write(&mut self, thumbnail: &Thumbnail) -> Result<()> {
        self.thumbnails.push(thumbnail.clone());
        Ok(())
    }
}

/// Per-input tallies surfaced in the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub kind: Option<&'static str>,
    pub extracted: usize,
    pub dormant: usize,
    pub skipped: usize,
    pub warnings: usize,
    /// Populated when the input was an IMMM index
    pub index_entries: Option<usize>,
}

/// Orchestrates extraction of one input file into a sink.
pub struct Pipeline<'a, S: ThumbnailSink> {
    sink: &'a mut S,
    cancel: CancelFlag,
    #[cfg(feature = "esedb")]
    esedb: Option<&'a EsedbView>,
}

impl<'a, S: ThumbnailSink> Pipeline<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Pipeline {
            sink,
            cancel: CancelFlag::new(),
            #[cfg(feature = "esedb")]
            esedb: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach a property-store view; joined by Thumb Cache ID.
    #[cfg(feature = "esedb")]
    pub fn with_esedb(mut self, view: Option<&'a EsedbView>) -> Self {
        self.esedb = view;
        self
    }

    /// Identify the container family and extract everything it holds.
    pub fn run<P: AsRef<Path>>(&mut self, path: P) -> Result<ExtractionSummary> {
        let mut reader = ByteReader::open(path.as_ref())?;
        let leading = reader.read_at_most(0, 8)?;
        match ContainerKind::sniff(&leading) {
            ContainerKind::CompoundFile => self.run_thumbs_db(reader),
            ContainerKind::Thumbcache => self.run_thumbcache(reader),
            ContainerKind::ThumbcacheIndex => self.run_index(reader),
            ContainerKind::Unknown => Err(Error::BadSignature),
        }
    }

    fn run_thumbs_db(&mut self, reader: ByteReader) -> Result<ExtractionSummary> {
        let mut summary = ExtractionSummary {
            kind: Some("thumbs.db"),
            ..Default::default()
        };
        let mut ole = OleFile::open(reader, self.cancel.clone())?;

        let catalog = match ole.stream_by_name("Catalog") {
            Ok(data) => Catalog::parse(&data)?,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) => {
                debug!("no Catalog stream; extracting without name metadata");
                Catalog::default()
            }
        };

        // Streams are visited in directory (SID) order, which is the
        // deterministic on-disk order.
        let stream_list: Vec<(u32, String)> = ole
            .entries()
            .iter()
            .filter(|e| e.is_stream() && e.name != "Catalog")
            .map(|e| (e.sid, e.name.clone()))
            .collect();
        for entry in ole.entries() {
            if let DirEntryType::Unknown(raw) = entry.entry_type {
                debug!("unused directory entry {} with type {raw}", entry.sid);
            }
        }

        for (sid, name) in stream_list {
            let data = ole.stream_bytes(sid)?;
            let decoded = match thumbs::decode(&data) {
                Ok(d) => d,
                Err(e) if e.is_recoverable() || matches!(e, Error::Truncated { .. }) => {
                    warn!("skipping stream {name:?}: {e}");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let stream_id = stream_id_for_name(&name);
            if stream_id.is_none() {
                warn!("stream {name:?} has a non-numeric name");
                summary.warnings += 1;
            }

            let mut thumbnail = Thumbnail {
                stream_id,
                width: (decoded.width > 0).then_some(decoded.width),
                height: (decoded.height > 0).then_some(decoded.height),
                mime: Some(ImageMime::Jpeg),
                bytes: decoded.jpeg,
                ..Default::default()
            };
            if let Some(record) = stream_id.and_then(|id| catalog.record_for(id)) {
                thumbnail.fill_name(Some(record.name.clone()));
                thumbnail.fill_mtime(record.mtime);
            }
            if decoded.reconstructed {
                debug!("stream {name:?} went through Type 1 reconstruction");
            }

            self.emit(&thumbnail)?;
            summary.extracted += 1;
        }

        Ok(summary)
    }

    fn run_thumbcache(&mut self, reader: ByteReader) -> Result<ExtractionSummary> {
        let mut summary = ExtractionSummary {
            kind: Some("thumbcache"),
            ..Default::default()
        };
        let mut cache = CacheFile::open(reader, self.cancel.clone())?;
        info!(
            "thumbcache {:?} bucket {:?}, {} declared entries",
            cache.header().version,
            cache.header().bucket,
            cache.header().entry_count
        );

        while let Some(entry) = cache.next_entry()? {
            if entry.data_checksum_ok == Some(false) {
                summary.warnings += 1;
            }

            let dormant = entry.is_dormant();
            let mut thumbnail = Thumbnail {
                cache_id: Some(entry.cache_id),
                width: entry.width.filter(|&w| w > 0),
                height: entry.height.filter(|&h| h > 0),
                mime: entry.kind.and_then(ImageMime::from_payload),
                bytes: entry.data,
                ..Default::default()
            };
            if dormant {
                summary.dormant += 1;
            } else if thumbnail.mime.is_none() {
                summary.warnings += 1;
            }

            self.join_esedb(&mut thumbnail, entry.cache_id);
            // The Vista/7 extension field is a last-resort name fragment.
            if thumbnail.original_name.is_none()
                && let Some(ext) = &entry.extension
            {
                debug!(
                    "entry 0x{:016x} carries only an extension ({ext})",
                    entry.cache_id
                );
            }

            self.emit(&thumbnail)?;
            summary.extracted += 1;
        }

        Ok(summary)
    }

    fn run_index(&mut self, reader: ByteReader) -> Result<ExtractionSummary> {
        let index = IndexFile::open(reader)?;
        info!(
            "thumbcache index {:?}: {} used of {} total entries",
            index.header.version, index.header.used_entries, index.header.total_entries
        );
        Ok(ExtractionSummary {
            kind: Some("thumbcache index"),
            index_entries: Some(index.entries.len()),
            ..Default::default()
        })
    }

    #[cfg(feature = "esedb")]
    fn join_esedb(&self, thumbnail: &mut Thumbnail, cache_id: u64) {
        if let Some(row) = self.esedb.and_then(|view| view.lookup(cache_id)) {
            thumbnail.fill_name(row.display_name().map(str::to_owned));
            if thumbnail.path.is_none() {
                thumbnail.path = row.path.clone();
            }
            thumbnail.fill_mtime(row.modified);
        }
    }

    #[cfg(not(feature = "esedb"))]
    fn join_esedb(&self, _thumbnail: &mut Thumbnail, _cache_id: u64) {}

    fn emit(&mut self, thumbnail: &Thumbnail) -> Result<()> {
        self.cancel.check()?;
        self.sink
            .write(thumbnail)
            .map_err(|e| Error::SinkWrite(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::testutil::{OleBuilder, minimal_file, write_temp};
    use crate::thumbcache::cache::testutil::{cache_file_bytes, entry_bytes, tiny_png};
    use crate::thumbs::catalog::build_catalog;
    use crate::thumbs::stream::{build_legacy_stream, build_modern_stream, tiny_jfif};
    use chrono::TimeZone;

    fn run_bytes(bytes: &[u8]) -> (ExtractionSummary, Vec<Thumbnail>) {
        let f = write_temp(bytes);
        let mut sink = MemorySink::default();
        let summary = Pipeline::new(&mut sink).run(f.path()).unwrap();
        (summary, sink.thumbnails)
    }

    #[test]
    fn empty_thumbs_db_emits_nothing() {
        let (summary, thumbs) = run_bytes(&minimal_file());
        assert_eq!(summary.extracted, 0);
        assert!(thumbs.is_empty());
    }

    #[test]
    fn single_type2_stream_is_passed_through() {
        let payload = tiny_jfif(8192);
        let stream = build_modern_stream(96, 96, &payload);
        let bytes = OleBuilder::new().stream("1", &stream).build();
        let (summary, thumbs) = run_bytes(&bytes);
        assert_eq!(summary.extracted, 1);
        assert_eq!(thumbs[0].stream_id, Some(1));
        assert_eq!(thumbs[0].mime, Some(ImageMime::Jpeg));
        assert_eq!(thumbs[0].bytes, payload);
    }

    #[test]
    fn type1_stream_is_reconstructed() {
        let raw = vec![0x3Cu8; 4096];
        let stream = build_legacy_stream(1, 96, 96, &raw);
        let bytes = OleBuilder::new().stream("2", &stream).build();
        let (summary, thumbs) = run_bytes(&bytes);
        assert_eq!(summary.extracted, 1);
        assert_eq!(thumbs[0].stream_id, Some(2));
        assert_eq!(&thumbs[0].bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&thumbs[0].bytes[thumbs[0].bytes.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(thumbs[0].width, Some(96));
    }

    #[cfg(feature = "imgconv")]
    #[test]
    fn type1_output_decodes_as_cmyk_96x96() {
        use crate::thumbs::jfif::testscan::flat_scan;
        use image::ImageDecoder;

        let scan = flat_scan(144, true);
        let stream = build_legacy_stream(1, 96, 96, &scan);
        let bytes = OleBuilder::new().stream("2", &stream).build();
        let (summary, thumbs) = run_bytes(&bytes);
        assert_eq!(summary.extracted, 1);

        let decoder = image::codecs::jpeg::JpegDecoder::new(std::io::Cursor::new(
            thumbs[0].bytes.as_slice(),
        ))
        .unwrap();
        assert_eq!(decoder.dimensions(), (96, 96));
        assert_eq!(
            decoder.original_color_type(),
            image::ExtendedColorType::Cmyk8
        );
        let img =
            image::load_from_memory_with_format(&thumbs[0].bytes, image::ImageFormat::Jpeg)
                .unwrap();
        assert_eq!((img.width(), img.height()), (96, 96));
    }

    #[test]
    fn catalog_join_attaches_name_and_mtime() {
        let mtime = chrono::Utc.with_ymd_and_hms(2019, 6, 1, 12, 0, 0).unwrap();
        let ft = crate::common::time::utc_to_filetime(mtime);
        let catalog = build_catalog(&[(7, ft, "photo.jpg")]);
        let stream = build_modern_stream(96, 96, &tiny_jfif(8192));
        let bytes = OleBuilder::new()
            .stream("Catalog", &catalog)
            .stream("7", &stream)
            .build();
        let (summary, thumbs) = run_bytes(&bytes);
        assert_eq!(summary.extracted, 1);
        assert_eq!(thumbs[0].original_name.as_deref(), Some("photo.jpg"));
        assert_eq!(thumbs[0].mtime, Some(mtime));
    }

    #[test]
    fn corrupt_stream_is_skipped_rest_processed() {
        let good = build_modern_stream(96, 96, &tiny_jfif(8192));
        let mut bad = build_modern_stream(96, 96, &tiny_jfif(8192));
        let len = bad.len();
        bad[len - 2..].copy_from_slice(&[0, 0]); // clobber the EOI
        let bytes = OleBuilder::new()
            .stream("1", &bad)
            .stream("2", &good)
            .build();
        let (summary, thumbs) = run_bytes(&bytes);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.extracted, 1);
        assert_eq!(thumbs[0].stream_id, Some(2));
    }

    #[test]
    fn thumbcache_entries_emit_in_file_order() {
        let entries = [
            entry_bytes(0x0AAA, &tiny_jfif(40), 256, 256),
            entry_bytes(0x0BBB, &tiny_png(), 256, 128),
            entry_bytes(0x0CCC, &[], 0, 0),
        ];
        let (summary, thumbs) = run_bytes(&cache_file_bytes(&entries));
        assert_eq!(summary.extracted, 3);
        assert_eq!(summary.dormant, 1);
        assert_eq!(thumbs[0].cache_id, Some(0x0AAA));
        assert_eq!(thumbs[0].mime, Some(ImageMime::Jpeg));
        assert_eq!(thumbs[1].mime, Some(ImageMime::Png));
        assert_eq!(thumbs[2].cache_id, Some(0x0CCC));
        assert_eq!(thumbs[2].mime, None);
        assert!(thumbs[2].bytes.is_empty());
    }

    #[test]
    fn index_input_reports_without_emitting() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"IMMM");
        bytes.extend_from_slice(&30u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        let (summary, thumbs) = run_bytes(&bytes);
        assert_eq!(summary.index_entries, Some(0));
        assert!(thumbs.is_empty());
    }

    #[test]
    fn unknown_signature_is_rejected() {
        let f = write_temp(b"not a container at all");
        let mut sink = MemorySink::default();
        let err = Pipeline::new(&mut sink).run(f.path()).unwrap_err();
        assert!(matches!(err, Error::BadSignature));
    }

    #[test]
    fn extraction_is_idempotent() {
        let stream = build_modern_stream(96, 96, &tiny_jfif(8192));
        let bytes = OleBuilder::new().stream("1", &stream).build();
        let f = write_temp(&bytes);

        let mut first = MemorySink::default();
        Pipeline::new(&mut first).run(f.path()).unwrap();
        let mut second = MemorySink::default();
        Pipeline::new(&mut second).run(f.path()).unwrap();
        assert_eq!(first.thumbnails.len(), second.thumbnails.len());
        for (a, b) in first.thumbnails.iter().zip(&second.thumbnails) {
            assert_eq!(a.bytes, b.bytes);
            assert_eq!(a.stream_id, b.stream_id);
        }
    }

    #[test]
    fn failing_sink_is_fatal() {
        struct FailingSink;
        impl ThumbnailSink for FailingSink {
            fn write(&mut self, _thumbnail: &Thumbnail) -> Result<()> {
                Err(Error::SinkWrite("disk full".into()))
            }
        }
        let stream = build_modern_stream(96, 96, &tiny_jfif(8192));
        let bytes = OleBuilder::new().stream("1", &stream).build();
        let f = write_temp(&bytes);
        let mut sink = FailingSink;
        let err = Pipeline::new(&mut sink).run(f.path()).unwrap_err();
        assert!(matches!(err, Error::SinkWrite(_)));
    }

    #[cfg(feature = "esedb")]
    #[test]
    fn esedb_join_attaches_path() {
        use crate::esedb::{EsedbRow, EsedbView};
        use std::collections::HashMap;

        let mut rows = HashMap::new();
        rows.insert(
            0x1A2B_3C4D_5E6F_7080,
            EsedbRow {
                path: Some("C:\\Users\\x\\a.png".into()),
                file_name: Some("a.png".into()),
                ..Default::default()
            },
        );
        let view = EsedbView::from_rows(rows);

        let entries = [entry_bytes(0x1A2B_3C4D_5E6F_7080, &tiny_png(), 96, 96)];
        let f = write_temp(&cache_file_bytes(&entries));
        let mut sink = MemorySink::default();
        Pipeline::new(&mut sink)
            .with_esedb(Some(&view))
            .run(f.path())
            .unwrap();
        assert_eq!(
            sink.thumbnails[0].path.as_deref(),
            Some("C:\\Users\\x\\a.png")
        );
        assert_eq!(sink.thumbnails[0].original_name.as_deref(), Some("a.png"));
    }

    #[test]
    fn cancellation_yields_cancelled() {
        let stream = build_modern_stream(96, 96, &tiny_jfif(8192));
        let bytes = OleBuilder::new().stream("1", &stream).build();
        let f = write_temp(&bytes);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut sink = MemorySink::default();
        let err = Pipeline::new(&mut sink)
            .with_cancel(cancel)
            .run(f.path())
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
