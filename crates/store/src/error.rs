//! Error types for blob store operations.

use thiserror::Error;

/// Errors that can occur during blob store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Object not found.
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Multipart upload not found (expired, aborted, or already completed).
    #[error("Multipart upload not found: {upload_id} for {bucket}/{key}")]
    UploadNotFound {
        bucket: String,
        key: String,
        upload_id: String,
    },

    /// Access denied.
    #[error("Access denied to {bucket}/{key}: {message}")]
    AccessDenied {
        bucket: String,
        key: String,
        message: String,
    },

    /// The source object no longer matches the checksum the copy was
    /// conditioned on. Fatal for the copy attempt that observes it.
    #[error("Source {key} changed mid-copy: expected ETag {expected}, found {actual}")]
    SourceModified {
        key: String,
        expected: String,
        actual: String,
    },

    /// A completion call referenced a part the backend does not hold.
    #[error("Invalid part {part_number} for {key}: {message}")]
    InvalidPart {
        key: String,
        part_number: u64,
        message: String,
    },

    /// Provider throttling.
    #[error("Throttled: {message}")]
    Throttled { message: String },

    /// Network error.
    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    /// Operation not supported by this backend.
    #[error("Operation not supported by this backend: {operation}")]
    Unsupported { operation: &'static str },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl StoreError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Throttled { .. } => true,
            StoreError::Network { retryable, .. } => *retryable,
            StoreError::NotFound { .. } => false,
            StoreError::UploadNotFound { .. } => false,
            StoreError::AccessDenied { .. } => false,
            StoreError::SourceModified { .. } => false,
            StoreError::InvalidPart { .. } => false,
            StoreError::Unsupported { .. } => false,
            StoreError::Other { .. } => false,
        }
    }
}
