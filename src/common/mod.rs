//! Common types and utilities shared across container families.
//!
//! Both the OLE Thumbs.db reader and the CMMM/IMMM thumbcache reader build
//! on the same bounded byte access, FILETIME handling and error taxonomy.

pub mod binary;
pub mod cancel;
pub mod error;
pub mod reader;
pub mod time;

// Re-exports for convenience
pub use cancel::CancelFlag;
pub use error::{Error, Result};
pub use reader::ByteReader;
