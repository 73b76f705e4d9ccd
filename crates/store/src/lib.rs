//! Blob store abstraction for cross-replica copy operations.
//!
//! This crate provides a backend-agnostic capability interface for the copy
//! and sync engine. It supports multiple backends:
//!
//! - **S3 Backend** (`blobsync-store-s3`) - AWS SDK implementation
//! - **In-memory Backend** - complete in-process implementation used by
//!   tests and local runs
//!
//! The trait covers plain object operations (head/get/put/list/copy/delete)
//! plus the two provider completion families: multipart-upload primitives
//! (create, ranged part copy, part listing, complete) and the compose-style
//! primitives (transient part blobs plus a compose call).

mod error;
mod keys;
mod manifest;
mod memory;
mod traits;
mod types;

pub use error::StoreError;
pub use keys::{
    blob_key_for, bundle_key_for, collection_key_for, file_key_for, KeyClass, BLOB_PREFIX,
    BUNDLE_PREFIX, COLLECTION_PREFIX, FILE_PREFIX,
};
pub use manifest::{BundleFileRef, BundleManifest, CollectionManifest, FileManifest};
pub use memory::InMemoryStore;
pub use traits::BlobStore;
pub use types::{
    compose_part_key, ByteRange, CompletionStyle, ObjectInfo, ObjectPart, PartPage, Replica,
};
