//! Shared data structures for blob store operations.

use serde::{Deserialize, Serialize};

/// How a backend turns uploaded parts into a durable destination object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStyle {
    /// Multipart upload: create, ranged part copies, complete (S3-style).
    Multipart,
    /// Transient part blobs plus a compose call (GCS-style).
    Compose,
}

/// A named storage backend participating in cross-replica replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Replica name (e.g. "aws", "gcp").
    pub name: String,
    /// Bucket holding blobs, manifests, and bundles for this replica.
    pub bucket: String,
    /// Completion family the replica's provider supports.
    pub completion: CompletionStyle,
}

impl Replica {
    /// Create a new replica definition.
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        completion: CompletionStyle,
    ) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            completion,
        }
    }
}

/// An inclusive byte range within a source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset (inclusive).
    pub first: u64,
    /// Last byte offset (inclusive).
    pub last: u64,
}

impl ByteRange {
    /// Range covered by 1-based `part_number` of an object of `total_size`
    /// bytes split into `part_size`-byte parts.
    pub fn for_part(part_number: u64, part_size: u64, total_size: u64) -> Self {
        let (first, last) = blobsync_common::part_range(part_number, part_size, total_size);
        Self { first, last }
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    /// True when the range covers zero bytes (never produced by `for_part`).
    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    /// HTTP `Range`-style rendering: `bytes=first-last`.
    pub fn to_http(&self) -> String {
        format!("bytes={}-{}", self.first, self.last)
    }
}

/// Summary of a stored object from head/list operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object size in bytes.
    pub size: u64,
    /// Provider checksum (ETag).
    pub etag: String,
}

/// One uploaded part as reported by the destination's part listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPart {
    /// 1-based part index.
    pub part_number: u64,
    /// Provider checksum for the part's bytes.
    pub etag: String,
    /// Part size in bytes.
    pub size: u64,
}

/// One page of a destination part listing.
#[derive(Debug, Clone, Default)]
pub struct PartPage {
    /// Parts in ascending index order.
    pub parts: Vec<ObjectPart>,
    /// Marker to pass for the next page, when truncated.
    pub next_part_number_marker: Option<u64>,
    /// True when more pages follow.
    pub is_truncated: bool,
}

/// Key of the transient blob holding 1-based part `part_number` for a
/// compose-style copy of `dest_key`.
pub fn compose_part_key(dest_key: &str, part_number: u64) -> String {
    format!("{}.part{}", dest_key, part_number)
}
