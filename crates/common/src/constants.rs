//! Shared constants used across blobsync crates.

use std::time::Duration;

/// Maximum number of parts a provider accepts for one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Minimum part size for multipart copies (64MB).
pub const MIN_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Objects at or below this size are copied in a single request.
/// Equal to the minimum part size so a multipart copy always has >= 2 parts.
pub const DEFAULT_SINGLE_SHOT_THRESHOLD: u64 = MIN_PART_SIZE;

/// Slack multiplier applied to the worst observed unit runtime before the
/// runner attempts another unit of work.
pub const TIME_OVERHEAD_FACTOR: f64 = 2.0;

/// Maximum reprocessing attempts for a dead-lettered message.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Pause between dependency checks while waiting for referenced entities
/// to appear at the destination.
pub const DEFAULT_DEPENDENCY_WAIT: Duration = Duration::from_secs(8);

/// Maximum parts fetched and copied during one unit of work.
pub const DEFAULT_UNIT_PART_BATCH: usize = 8;

/// Concurrent part copies within one unit of work.
pub const DEFAULT_COPY_CONCURRENCY: usize = 4;

/// Page size for destination part listings.
pub const PART_LIST_PAGE_SIZE: usize = 1_000;
