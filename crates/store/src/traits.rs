//! Blob store capability trait - implemented by each backend.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{ByteRange, ObjectInfo, ObjectPart, PartPage};

/// Low-level blob store operations consumed by the copy/sync engine.
///
/// Implementations must be safe for concurrent use: the engine issues
/// parallel part copies against disjoint part indices without locking, and
/// relies on the backend's own part/blob listings as the single source of
/// truth for what has already been written.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Look up an object's size and checksum.
    /// Returns None if the object doesn't exist.
    async fn head_object(&self, bucket: &str, key: &str)
        -> Result<Option<ObjectInfo>, StoreError>;

    /// Download an object to bytes.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Upload bytes, optionally with user metadata.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StoreError>;

    /// List keys under a prefix, in ascending key order.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Server-side single-shot copy.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Begin a multipart upload at the destination.
    ///
    /// # Returns
    /// The provider's upload identifier.
    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String, StoreError>;

    /// Server-side copy of one source byte range into part `part_number` of
    /// an open multipart upload, conditioned on the source's checksum.
    ///
    /// # Errors
    /// `StoreError::SourceModified` when the source object's checksum no
    /// longer equals `expected_source_etag`.
    ///
    /// # Returns
    /// The uploaded part's ETag.
    #[allow(clippy::too_many_arguments)]
    async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u64,
        range: ByteRange,
        src_bucket: &str,
        src_key: &str,
        expected_source_etag: &str,
    ) -> Result<String, StoreError>;

    /// List uploaded parts of an open multipart upload, one page at a time.
    ///
    /// # Arguments
    /// * `part_number_marker` - return only parts with a higher index
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: Option<u64>,
    ) -> Result<PartPage, StoreError>;

    /// Complete a multipart upload from its part list (ascending index
    /// order, ETags as returned by `list_parts`).
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[ObjectPart],
    ) -> Result<(), StoreError>;

    /// Server-side copy of one source byte range into a transient part blob
    /// (compose-style backends), conditioned on the source's checksum.
    ///
    /// # Returns
    /// The part blob's ETag.
    async fn copy_part_blob(
        &self,
        bucket: &str,
        part_key: &str,
        range: ByteRange,
        src_bucket: &str,
        src_key: &str,
        expected_source_etag: &str,
    ) -> Result<String, StoreError>;

    /// Concatenate existing blobs into `dst_key`, in the given order
    /// (compose-style backends).
    async fn compose(
        &self,
        bucket: &str,
        dst_key: &str,
        part_keys: &[String],
    ) -> Result<(), StoreError>;

    /// Object size, erroring when the object doesn't exist.
    async fn get_size(&self, bucket: &str, key: &str) -> Result<u64, StoreError> {
        match self.head_object(bucket, key).await? {
            Some(info) => Ok(info.size),
            None => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Object checksum (ETag), erroring when the object doesn't exist.
    async fn get_checksum(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        match self.head_object(bucket, key).await? {
            Some(info) => Ok(info.etag),
            None => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Check whether an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self.head_object(bucket, key).await?.is_some())
    }
}
