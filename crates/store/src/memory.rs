//! In-memory blob store backend.
//!
//! A complete in-process implementation of [`BlobStore`], including
//! multipart and compose bookkeeping. Used by the engine's tests and by
//! local runs; it mirrors provider behavior that the engine depends on:
//!
//! - single-put ETags are the MD5 of the object bytes
//! - multipart-completed ETags are the composite `md5-{count}` form
//! - part listings are paged and authoritative
//! - completing an already-completed upload is idempotent
//!
//! The store also counts mutating calls so tests can assert that
//! short-circuited syncs perform zero backend writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use blobsync_common::{compute_composite_etag, normalize_etag};

use crate::error::StoreError;
use crate::traits::BlobStore;
use crate::types::{ByteRange, ObjectInfo, ObjectPart, PartPage};

/// One stored object.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    metadata: HashMap<String, String>,
}

/// One open multipart upload.
#[derive(Debug, Clone, Default)]
struct OpenUpload {
    bucket: String,
    key: String,
    /// Uploaded parts by 1-based index.
    parts: BTreeMap<u64, StoredPart>,
}

#[derive(Debug, Clone)]
struct StoredPart {
    data: Vec<u8>,
    etag: String,
}

#[derive(Debug, Default)]
struct State {
    /// Objects keyed by (bucket, key).
    objects: BTreeMap<(String, String), StoredObject>,
    /// Open multipart uploads by upload id.
    uploads: HashMap<String, OpenUpload>,
    next_upload_id: u64,
}

/// In-memory [`BlobStore`] implementation.
pub struct InMemoryStore {
    state: Mutex<State>,
    write_count: AtomicU64,
    part_page_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            write_count: AtomicU64::new(0),
            part_page_size: blobsync_common::PART_LIST_PAGE_SIZE,
        }
    }

    /// Set the part-listing page size (tests exercise paging with small
    /// pages).
    pub fn with_part_page_size(mut self, page_size: usize) -> Self {
        self.part_page_size = page_size.max(1);
        self
    }

    /// Number of mutating backend calls issued so far.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Seed an object directly, without counting a write.
    pub fn seed_object(&self, bucket: &str, key: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.to_vec(),
                etag: md5_hex(data),
                metadata: HashMap::new(),
            },
        );
    }

    /// Seed an object with an explicit ETag (e.g. the composite checksum a
    /// multipart-uploaded source would carry), without counting a write.
    pub fn seed_object_with_etag(&self, bucket: &str, key: &str, data: &[u8], etag: &str) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.to_vec(),
                etag: etag.to_string(),
                metadata: HashMap::new(),
            },
        );
    }

    /// Overwrite an object's bytes without updating its ETag, simulating a
    /// source that mutated after its checksum was recorded.
    pub fn corrupt_object(&self, bucket: &str, key: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(obj) = state
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            obj.data = data.to_vec();
        }
    }

    /// Part indices currently uploaded for an open multipart upload.
    pub fn uploaded_part_numbers(&self, upload_id: &str) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        state
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    fn record_write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// MD5 hex digest of `data`.
fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn object_key(bucket: &str, key: &str) -> (String, String) {
    (bucket.to_string(), key.to_string())
}

/// Slice `range` out of a source object, validating bounds and the
/// conditioned checksum.
fn copy_range(
    obj: &StoredObject,
    src_key: &str,
    range: ByteRange,
    expected_source_etag: &str,
) -> Result<Vec<u8>, StoreError> {
    if normalize_etag(&obj.etag) != normalize_etag(expected_source_etag) {
        return Err(StoreError::SourceModified {
            key: src_key.to_string(),
            expected: expected_source_etag.to_string(),
            actual: obj.etag.clone(),
        });
    }
    let len: u64 = obj.data.len() as u64;
    if range.is_empty() || range.last >= len {
        return Err(StoreError::Other {
            message: format!(
                "Range {}-{} out of bounds for {} ({} bytes)",
                range.first, range.last, src_key, len
            ),
        });
    }
    Ok(obj.data[range.first as usize..=range.last as usize].to_vec())
}

#[async_trait]
impl BlobStore for InMemoryStore {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectInfo>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.objects.get(&object_key(bucket, key)).map(|obj| {
            ObjectInfo {
                size: obj.data.len() as u64,
                etag: obj.etag.clone(),
            }
        }))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&object_key(bucket, key))
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            object_key(bucket, key),
            StoredObject {
                data: data.to_vec(),
                etag: md5_hex(data),
                metadata: metadata.cloned().unwrap_or_default(),
            },
        );
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        let obj = state
            .objects
            .get(&object_key(src_bucket, src_key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?;
        state.objects.insert(object_key(dst_bucket, dst_key), obj);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        state.objects.remove(&object_key(bucket, key));
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        state.next_upload_id += 1;
        let upload_id: String = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

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
    ) -> Result<String, StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        let data: Vec<u8> = {
            let obj = state
                .objects
                .get(&object_key(src_bucket, src_key))
                .ok_or_else(|| StoreError::NotFound {
                    bucket: src_bucket.to_string(),
                    key: src_key.to_string(),
                })?;
            copy_range(obj, src_key, range, expected_source_etag)?
        };
        let etag: String = md5_hex(&data);
        let upload =
            state
                .uploads
                .get_mut(upload_id)
                .ok_or_else(|| StoreError::UploadNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                })?;
        upload
            .parts
            .insert(part_number, StoredPart { data, etag: etag.clone() });
        Ok(etag)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: Option<u64>,
    ) -> Result<PartPage, StoreError> {
        let state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| StoreError::UploadNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            })?;

        let after: u64 = part_number_marker.unwrap_or(0);
        let mut parts: Vec<ObjectPart> = Vec::new();
        let mut is_truncated = false;
        for (&number, part) in upload.parts.range(after + 1..) {
            if parts.len() == self.part_page_size {
                is_truncated = true;
                break;
            }
            parts.push(ObjectPart {
                part_number: number,
                etag: part.etag.clone(),
                size: part.data.len() as u64,
            });
        }

        let next_part_number_marker: Option<u64> = if is_truncated {
            parts.last().map(|p| p.part_number)
        } else {
            None
        };
        Ok(PartPage {
            parts,
            next_part_number_marker,
            is_truncated,
        })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[ObjectPart],
    ) -> Result<(), StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();

        let upload = match state.uploads.get(upload_id) {
            Some(upload) => upload.clone(),
            // Provider concurrency guard: a second completion of an upload
            // that already produced the object is a no-op.
            None if state.objects.contains_key(&object_key(bucket, key)) => return Ok(()),
            None => {
                return Err(StoreError::UploadNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                })
            }
        };

        let mut data: Vec<u8> = Vec::new();
        let mut part_etags: Vec<String> = Vec::with_capacity(parts.len());
        for requested in parts {
            let stored =
                upload
                    .parts
                    .get(&requested.part_number)
                    .ok_or_else(|| StoreError::InvalidPart {
                        key: key.to_string(),
                        part_number: requested.part_number,
                        message: "part was never uploaded".to_string(),
                    })?;
            if normalize_etag(&stored.etag) != normalize_etag(&requested.etag) {
                return Err(StoreError::InvalidPart {
                    key: key.to_string(),
                    part_number: requested.part_number,
                    message: format!(
                        "ETag mismatch: stored {}, requested {}",
                        stored.etag, requested.etag
                    ),
                });
            }
            data.extend_from_slice(&stored.data);
            part_etags.push(stored.etag.clone());
        }

        let etag: String =
            compute_composite_etag(&part_etags).map_err(|err| StoreError::Other {
                message: err.to_string(),
            })?;
        state.objects.insert(
            object_key(&upload.bucket, &upload.key),
            StoredObject {
                data,
                etag,
                metadata: HashMap::new(),
            },
        );
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn copy_part_blob(
        &self,
        bucket: &str,
        part_key: &str,
        range: ByteRange,
        src_bucket: &str,
        src_key: &str,
        expected_source_etag: &str,
    ) -> Result<String, StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        let data: Vec<u8> = {
            let obj = state
                .objects
                .get(&object_key(src_bucket, src_key))
                .ok_or_else(|| StoreError::NotFound {
                    bucket: src_bucket.to_string(),
                    key: src_key.to_string(),
                })?;
            copy_range(obj, src_key, range, expected_source_etag)?
        };
        let etag: String = md5_hex(&data);
        state.objects.insert(
            object_key(bucket, part_key),
            StoredObject {
                data,
                etag: etag.clone(),
                metadata: HashMap::new(),
            },
        );
        Ok(etag)
    }

    async fn compose(
        &self,
        bucket: &str,
        dst_key: &str,
        part_keys: &[String],
    ) -> Result<(), StoreError> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        let mut data: Vec<u8> = Vec::new();
        for part_key in part_keys {
            let obj = state
                .objects
                .get(&object_key(bucket, part_key))
                .ok_or_else(|| StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: part_key.to_string(),
                })?;
            data.extend_from_slice(&obj.data);
        }
        let etag: String = md5_hex(&data);
        state.objects.insert(
            object_key(bucket, dst_key),
            StoredObject {
                data,
                etag,
                metadata: HashMap::new(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_head_get_round_trip() {
        let store = InMemoryStore::new();
        store.put_object("b", "k", b"hello", None).await.unwrap();

        let info = store.head_object("b", "k").await.unwrap().unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.etag, md5_hex(b"hello"));
        assert_eq!(store.get_object("b", "k").await.unwrap(), b"hello");
        assert!(store.head_object("b", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multipart_copy_and_complete() {
        let store = InMemoryStore::new();
        store.seed_object("b", "src", b"aaaabbbbcc");
        let src_etag: String = store.get_checksum("b", "src").await.unwrap();

        let upload_id = store.create_multipart("b", "dst").await.unwrap();
        let mut parts: Vec<ObjectPart> = Vec::new();
        for part_number in 1..=3u64 {
            let range = ByteRange::for_part(part_number, 4, 10);
            let etag = store
                .upload_part_copy("b", "dst", &upload_id, part_number, range, "b", "src", &src_etag)
                .await
                .unwrap();
            parts.push(ObjectPart {
                part_number,
                etag,
                size: range.len(),
            });
        }

        store
            .complete_multipart("b", "dst", &upload_id, &parts)
            .await
            .unwrap();
        assert_eq!(store.get_object("b", "dst").await.unwrap(), b"aaaabbbbcc");

        let etag: String = store.get_checksum("b", "dst").await.unwrap();
        assert!(etag.ends_with("-3"));
    }

    #[tokio::test]
    async fn test_complete_is_idempotent_after_object_exists() {
        let store = InMemoryStore::new();
        store.seed_object("b", "src", b"12345678");
        let src_etag: String = store.get_checksum("b", "src").await.unwrap();

        let upload_id = store.create_multipart("b", "dst").await.unwrap();
        let range = ByteRange::for_part(1, 8, 8);
        let etag = store
            .upload_part_copy("b", "dst", &upload_id, 1, range, "b", "src", &src_etag)
            .await
            .unwrap();
        let parts = vec![ObjectPart {
            part_number: 1,
            etag,
            size: 8,
        }];

        store
            .complete_multipart("b", "dst", &upload_id, &parts)
            .await
            .unwrap();
        // Second completion observes the finished object.
        store
            .complete_multipart("b", "dst", &upload_id, &parts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_part_copy_rejects_modified_source() {
        let store = InMemoryStore::new();
        store.seed_object("b", "src", b"original");
        let src_etag: String = store.get_checksum("b", "src").await.unwrap();
        store.corrupt_object("b", "src", b"mutated!");

        let upload_id = store.create_multipart("b", "dst").await.unwrap();
        let err = store
            .upload_part_copy(
                "b",
                "dst",
                &upload_id,
                1,
                ByteRange { first: 0, last: 7 },
                "b",
                "src",
                &md5_hex(b"mutated!"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SourceModified { .. }));
        // The recorded checksum still matches, so a conditioned copy passes.
        store
            .upload_part_copy(
                "b",
                "dst",
                &upload_id,
                1,
                ByteRange { first: 0, last: 7 },
                "b",
                "src",
                &src_etag,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_parts_pages_in_order() {
        let store = InMemoryStore::new().with_part_page_size(2);
        store.seed_object("b", "src", b"abcdefghij");
        let src_etag: String = store.get_checksum("b", "src").await.unwrap();
        let upload_id = store.create_multipart("b", "dst").await.unwrap();

        // Upload parts out of order.
        for part_number in [5u64, 2, 4, 1, 3] {
            let range = ByteRange::for_part(part_number, 2, 10);
            store
                .upload_part_copy("b", "dst", &upload_id, part_number, range, "b", "src", &src_etag)
                .await
                .unwrap();
        }

        let mut seen: Vec<u64> = Vec::new();
        let mut marker: Option<u64> = None;
        loop {
            let page = store.list_parts("b", "dst", &upload_id, marker).await.unwrap();
            seen.extend(page.parts.iter().map(|p| p.part_number));
            if !page.is_truncated {
                break;
            }
            marker = page.next_part_number_marker;
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_compose_concatenates_and_write_count_tracks() {
        let store = InMemoryStore::new();
        store.seed_object("b", "dst.part1", b"hello ");
        store.seed_object("b", "dst.part2", b"world");
        assert_eq!(store.write_count(), 0);

        store
            .compose(
                "b",
                "dst",
                &["dst.part1".to_string(), "dst.part2".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(store.get_object("b", "dst").await.unwrap(), b"hello world");
        assert_eq!(store.write_count(), 1);
    }
}
