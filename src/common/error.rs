//! Unified error types for the vignette library.
//!
//! One error enum covers both container families (OLE Thumbs.db and
//! CMMM/IMMM thumbcaches) plus the ESE cross-referencing layer, presenting
//! a consistent API to users.
use thiserror::Error;

/// Main error type for vignette operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Leading bytes match no recognized container family
    #[error("Not a recognized thumbnail cache container")]
    BadSignature,

    /// Container header is structurally invalid
    #[error("Invalid header: {0}")]
    BadHeader(String),

    /// A FAT or miniFAT chain loops or leaves the file
    #[error("Corrupt sector chain: {0}")]
    CorruptChain(String),

    /// A directory entry violates the on-disk layout rules
    #[error("Invalid directory entry: {0}")]
    BadDirectory(String),

    /// A read past the end of the input or of a stream
    #[error("Truncated data: wanted {wanted} bytes at offset {offset}")]
    Truncated { offset: u64, wanted: usize },

    /// Stream-declared payload length disagrees with the stream size
    #[error("Entry length mismatch: declared {declared}, actual {actual}")]
    EntryLengthMismatch { declared: u64, actual: u64 },

    /// A JPEG payload does not terminate with an EOI marker
    #[error("JPEG payload is missing its EOI marker")]
    MissingEoi,

    /// A directory or cache entry carries an unrecognized type or signature
    #[error("Unknown entry type: {0}")]
    UnknownEntryType(String),

    /// The ESE database cannot be opened (locked, corrupt, missing)
    #[error("ESE database unreadable: {0}")]
    EsedbUnreadable(String),

    /// The ESE database lacks the Windows Search property tables
    #[error("ESE database has no usable property store table")]
    EsedbSchemaMissing,

    /// The output sink rejected a thumbnail
    #[error("Sink write failure: {0}")]
    SinkWrite(String),

    /// Cooperative cancellation was observed
    #[error("Extraction cancelled")]
    Cancelled,
}

/// Result type for vignette operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error abandons only the current stream or entry, leaving
    /// the rest of the container parseable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::EntryLengthMismatch { .. }
                | Error::MissingEoi
                | Error::UnknownEntryType(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(Error::MissingEoi.is_recoverable());
        assert!(
            Error::EntryLengthMismatch {
                declared: 10,
                actual: 8
            }
            .is_recoverable()
        );
        assert!(!Error::BadSignature.is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }
}
