//! Manifest documents.
//!
//! Files, bundles, and collections are flat JSON documents. A file manifest
//! records the four checksums of its content (and therefore its blob key);
//! a bundle references file manifests by uuid+version; a collection
//! references member entities by full key.

use blobsync_common::ChecksumSet;
use serde::{Deserialize, Serialize};

use crate::keys::{blob_key_for, file_key_for};

/// Manifest for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Checksums of the file's content.
    #[serde(flatten)]
    pub checksums: ChecksumSet,
    /// Content size in bytes.
    pub size: u64,
    /// Content type recorded at ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl FileManifest {
    /// Key of the blob this file's content lives under.
    pub fn blob_key(&self) -> String {
        blob_key_for(&self.checksums.blob_key())
    }
}

/// One file reference inside a bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFileRef {
    /// Logical file name within the bundle.
    pub name: String,
    /// File UUID.
    pub uuid: String,
    /// File version.
    pub version: String,
}

impl BundleFileRef {
    /// Key of the referenced file manifest.
    pub fn file_key(&self) -> String {
        file_key_for(&self.uuid, &self.version)
    }
}

/// Manifest for a bundle of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Files belonging to this bundle.
    pub files: Vec<BundleFileRef>,
}

/// Manifest for a collection of entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    /// Full keys of member entities (files, bundles, nested collections).
    pub contents: Vec<String>,
}
