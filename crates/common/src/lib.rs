//! Shared types and utilities for blobsync.
//!
//! This crate provides common functionality used across all blobsync crates:
//! - Content-address (blob key) derivation from checksum sets
//! - Composite multipart checksum computation and verification
//! - Part-size policy for partitioned copies
//! - Shared constants and retry settings

pub mod checksum;
pub mod constants;
pub mod error;
pub mod parts;
pub mod retry;

// Re-export commonly used items at crate root
pub use checksum::{compute_composite_etag, multipart_part_count, normalize_etag, ChecksumSet};
pub use constants::*;
pub use error::ChecksumError;
pub use parts::{part_count_for, part_range, part_size_for, part_size_matching};
pub use retry::RetrySettings;
