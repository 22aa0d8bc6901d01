//! Vignette - a forensic parser for Windows thumbnail caches
//!
//! This library recovers embedded thumbnail images and their metadata from
//! the two container families Windows has used for thumbnails:
//!
//! - **Thumbs.db** (Windows 98 through Server 2003): OLE compound files
//!   whose streams hold either plain JFIF images or the proprietary
//!   Type 1 "YMCA" payload, which is reconstructed into a valid CMYK JPEG
//! - **Thumbcache_*.db / Thumbcache_idx.db** (Vista and later): flat CMMM
//!   entry caches and IMMM indexes keyed by 64-bit Thumb Cache IDs
//!
//! When a Windows Search database (`Windows.edb`) is available, thumbcache
//! entries are cross-referenced against it to recover original paths and
//! timestamps (requires the `esedb` feature).
//!
//! # Example - Extracting from a Thumbs.db
//!
//! ```no_run
//! use vignette::pipeline::{MemorySink, Pipeline};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sink = MemorySink::default();
//! let summary = Pipeline::new(&mut sink).run("Thumbs.db")?;
//! println!("recovered {} thumbnails", summary.extracted);
//! for thumb in &sink.thumbnails {
//!     if let Some(name) = &thumb.original_name {
//!         println!("{name}: {} bytes", thumb.bytes.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Low-level compound file access
//!
//! ```no_run
//! use vignette::ole::OleFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ole = OleFile::open_path("Thumbs.db")?;
//! for entry in ole.entries() {
//!     println!("{:?} {}", entry.entry_type, entry.name);
//! }
//! let catalog = ole.stream_by_name("Catalog")?;
//! println!("catalog stream: {} bytes", catalog.len());
//! # Ok(())
//! # }
//! ```

/// Common types: errors, bounded binary reads, FILETIME, cancellation
pub mod common;

/// OLE compound file (structured storage) reader
pub mod ole;

/// Thumbs.db stream and catalog decoding
pub mod thumbs;

/// Vista+ CMMM/IMMM thumbcache parsing
pub mod thumbcache;

/// Windows Search (ESE) cross-referencing
#[cfg(feature = "esedb")]
pub mod esedb;

/// Container dispatch and the extraction pipeline
pub mod pipeline;

// Re-export commonly used types for convenience
pub use common::{CancelFlag, Error, Result};
pub use pipeline::{ContainerKind, ExtractionSummary, Pipeline, Thumbnail, ThumbnailSink};
