//! Windows Vista+ thumbcache parsing: CMMM entry files and the IMMM
//! index.

/// Format constants shared by entry and index files
pub mod consts;

/// CMMM entry file header and entry iteration
pub mod cache;

/// IMMM index file parsing
pub mod index;

pub use cache::{
    CacheBucket, CacheEntry, CacheFile, CacheHeader, FormatVersion, PayloadKind,
    is_cmmm_signature,
};
pub use index::{IndexEntry, IndexFile, IndexHeader, is_immm_signature};
