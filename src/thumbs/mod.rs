//! Thumbs.db stream decoding: catalog records, the two stream header
//! generations, and reconstruction of Type 1 payloads into CMYK JPEGs.

/// `Catalog` stream records binding stream ids to original names
pub mod catalog;

/// Synthesis of JPEG framing around raw Type 1 scan data
pub mod jfif;

/// Per-stream header decoding and Type 1/Type 2 dispatch
pub mod stream;

pub use catalog::{Catalog, CatalogRecord, stream_id_for_name, stream_name_for_id};
pub use stream::{ThumbStream, decode};
