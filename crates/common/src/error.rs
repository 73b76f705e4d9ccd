//! Shared error types used across blobsync crates.

use thiserror::Error;

/// Errors raised while deriving or verifying checksums.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    /// An ETag is not a valid hex digest.
    #[error("Invalid ETag: {etag}")]
    InvalidEtag {
        /// The offending ETag value.
        etag: String,
    },

    /// A blob key does not have the expected four-checksum shape.
    #[error("Invalid blob key: {key}")]
    InvalidBlobKey {
        /// The offending key.
        key: String,
    },

    /// A composite checksum was requested for zero parts.
    #[error("Cannot compute a composite checksum over zero parts")]
    NoParts,
}
