//! Error types for the copy/sync engine.

use blobsync_common::ChecksumError;
use blobsync_store::StoreError;
use thiserror::Error;

/// How an error should be handled at the scheduler boundary.
///
/// The reaper's give-up after the maximum retry count is the one permanent
/// outcome; it is logged and absorbed there rather than surfaced as an
/// error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying as-is (network, throttling).
    Transient,
    /// Aborts this task instance; retrying the whole attempt is the
    /// external scheduler's policy decision.
    Fatal,
    /// Destination already holds different content than this attempt
    /// would write. Distinct from benign idempotent re-entry.
    Conflict,
}

/// Errors that can occur during copy and sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A backend call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The source object's checksum changed mid-copy (object mutated).
    #[error("Source {key} changed mid-copy: expected {expected}, found {actual}")]
    SourceChanged {
        key: String,
        expected: String,
        actual: String,
    },

    /// The composite checksum computed from destination parts does not
    /// match the source's recorded multipart checksum.
    #[error("Composite checksum mismatch for {key}: recorded {expected}, computed {actual}")]
    CompositeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Finalization found fewer parts than the copy produced.
    #[error("Incomplete part set for {key}: expected {expected} parts, found {found}")]
    IncompleteParts {
        key: String,
        expected: u64,
        found: u64,
    },

    /// Destination metadata exists with different content.
    #[error("Destination metadata for {key} exists with different content")]
    MetadataConflict { key: String },

    /// A replica name is not registered with the client pool.
    #[error("Unknown replica: {name}")]
    UnknownReplica { name: String },

    /// A sync names the same replica as source and destination.
    #[error("Source and destination replica must differ: {name}")]
    InvalidReplicaPair { name: String },

    /// Serialized state or a manifest document failed to parse.
    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A checksum could not be computed or parsed.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Invariant violation inside the engine itself.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Classify this error for the scheduler boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Store(err) if err.is_retryable() => ErrorClass::Transient,
            SyncError::MetadataConflict { .. } => ErrorClass::Conflict,
            _ => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let transient = SyncError::Store(StoreError::Throttled {
            message: "slow down".into(),
        });
        assert_eq!(transient.class(), ErrorClass::Transient);

        let fatal = SyncError::SourceChanged {
            key: "k".into(),
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(fatal.class(), ErrorClass::Fatal);

        let conflict = SyncError::MetadataConflict { key: "k".into() };
        assert_eq!(conflict.class(), ErrorClass::Conflict);

        let network_hard = SyncError::Store(StoreError::Network {
            message: "tls".into(),
            retryable: false,
        });
        assert_eq!(network_hard.class(), ErrorClass::Fatal);
    }
}
