//! Checksum-verified completion of partitioned copies.
//!
//! Converts "all parts present" into a durable destination object. The
//! multipart path verifies the composite checksum computed from the
//! destination's part ETags against the source checksum recorded at setup
//! before issuing the provider's complete call; the compose path verifies
//! every transient part blob exists, composes them in index order, and
//! cleans the transient blobs up best-effort.

use std::collections::HashMap;

use blobsync_common::{compute_composite_etag, multipart_part_count, normalize_etag};
use blobsync_store::{compose_part_key, BlobStore, CompletionStyle, ObjectPart};

use crate::copy::CopyTaskState;
use crate::error::SyncError;

/// Finalizes a finished [`CopyTaskState`] into a durable object.
pub struct CompositionFinalizer<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> CompositionFinalizer<'a> {
    /// Create a finalizer over the destination's store capability.
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    /// Complete the destination object for a copy whose parts are all
    /// present.
    ///
    /// Single-shot copies are already durable and finalize as a no-op.
    ///
    /// # Errors
    /// `SyncError::CompositeMismatch` when the destination parts do not
    /// reproduce the source's recorded multipart checksum - fatal, the
    /// upload is not completed.
    pub async fn finalize(&self, state: &CopyTaskState) -> Result<(), SyncError> {
        if state.part_count <= 1 {
            return Ok(());
        }
        match state.completion {
            CompletionStyle::Multipart => self.complete_multipart(state).await,
            CompletionStyle::Compose => self.compose(state).await,
        }
    }

    async fn complete_multipart(&self, state: &CopyTaskState) -> Result<(), SyncError> {
        let upload_id: &str = state.upload_id.as_deref().ok_or_else(|| SyncError::Internal {
            message: format!("multipart copy of {} has no upload id", state.dst_key),
        })?;

        // The authoritative part list, in index order.
        let mut parts: Vec<ObjectPart> = Vec::with_capacity(state.part_count as usize);
        let mut marker: Option<u64> = None;
        loop {
            let page = self
                .store
                .list_parts(&state.dst_bucket, &state.dst_key, upload_id, marker)
                .await?;
            parts.extend(page.parts);
            if !page.is_truncated {
                break;
            }
            marker = page.next_part_number_marker;
        }

        if parts.len() as u64 != state.part_count {
            return Err(SyncError::IncompleteParts {
                key: state.dst_key.clone(),
                expected: state.part_count,
                found: parts.len() as u64,
            });
        }

        // End-to-end integrity: the composite of our part ETags must
        // reproduce the source's multipart checksum. Sources that were
        // never multipart-uploaded carry a plain ETag; their split is not
        // recoverable, so there is nothing to compare against.
        let recorded: &str = normalize_etag(&state.source_etag);
        if multipart_part_count(recorded).is_some() {
            let etags: Vec<&str> = parts.iter().map(|part| part.etag.as_str()).collect();
            let composite: String = compute_composite_etag(&etags)?;
            if composite != recorded {
                return Err(SyncError::CompositeMismatch {
                    key: state.dst_key.clone(),
                    expected: recorded.to_string(),
                    actual: composite,
                });
            }
        } else {
            tracing::debug!(
                dst = %state.dst_key,
                "source ETag is not composite, skipping composite verification"
            );
        }

        self.store
            .complete_multipart(&state.dst_bucket, &state.dst_key, upload_id, &parts)
            .await?;
        tracing::info!(dst = %state.dst_key, part_count = state.part_count, "completed multipart copy");
        Ok(())
    }

    async fn compose(&self, state: &CopyTaskState) -> Result<(), SyncError> {
        let part_keys: Vec<String> = (1..=state.part_count)
            .map(|part_number| compose_part_key(&state.dst_key, part_number))
            .collect();

        let mut found: u64 = 0;
        for part_key in &part_keys {
            if self.store.exists(&state.dst_bucket, part_key).await? {
                found += 1;
            }
        }
        if found != state.part_count {
            return Err(SyncError::IncompleteParts {
                key: state.dst_key.clone(),
                expected: state.part_count,
                found,
            });
        }

        self.store
            .compose(&state.dst_bucket, &state.dst_key, &part_keys)
            .await?;
        tracing::info!(dst = %state.dst_key, part_count = state.part_count, "composed copy");

        // Leftover transient parts cost storage, not correctness.
        for part_key in &part_keys {
            if let Err(err) = self.store.delete_object(&state.dst_bucket, part_key).await {
                tracing::warn!(%err, part_key = %part_key, "failed to delete transient part blob");
            }
        }
        Ok(())
    }

    /// Write destination metadata exactly once.
    ///
    /// # Returns
    /// `true` when the document was written, `false` when an identical
    /// document already exists (benign idempotent re-entry).
    ///
    /// # Errors
    /// `SyncError::MetadataConflict` when the key exists with different
    /// content - surfaced distinctly so callers can tell an actual
    /// inconsistency from a retry.
    pub async fn write_metadata(
        &self,
        bucket: &str,
        key: &str,
        document: &[u8],
        user_metadata: Option<&HashMap<String, String>>,
    ) -> Result<bool, SyncError> {
        if self.store.exists(bucket, key).await? {
            let existing: Vec<u8> = self.store.get_object(bucket, key).await?;
            if existing == document {
                return Ok(false);
            }
            return Err(SyncError::MetadataConflict {
                key: key.to_string(),
            });
        }
        self.store
            .put_object(bucket, key, document, user_metadata)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::{CopyOptions, PartitionedCopyTask};
    use crate::runner::ChunkedTask;
    use blobsync_store::InMemoryStore;

    fn bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Drive a copy task until it reports completion.
    async fn drive(task: &mut PartitionedCopyTask<'_>) -> CopyTaskState {
        for _ in 0..100 {
            if let Some(state) = task.run_one_unit().await.unwrap() {
                return state;
            }
        }
        panic!("copy did not finish");
    }

    /// Seed a source whose recorded ETag is the composite its multipart
    /// copy will reproduce.
    async fn seed_multipart_source(
        store: &InMemoryStore,
        bucket: &str,
        key: &str,
        data: &[u8],
        part_size: u64,
    ) {
        let part_etags: Vec<String> = data
            .chunks(part_size as usize)
            .map(|chunk| format!("{:x}", md5::compute(chunk)))
            .collect();
        let etag: String = compute_composite_etag(&part_etags).unwrap();
        store.seed_object_with_etag(bucket, key, data, &etag);
    }

    #[tokio::test]
    async fn test_multipart_finalize_verifies_and_completes() {
        let store = InMemoryStore::new();
        let data: Vec<u8> = bytes(95);
        seed_multipart_source(&store, "src", "blobs/a", &data, 10).await;

        let mut task = PartitionedCopyTask::begin(
            &store,
            "src",
            "blobs/a",
            "dst",
            "blobs/a",
            CompletionStyle::Multipart,
            CopyOptions::new().with_part_size(10),
        )
        .await
        .unwrap();
        let state: CopyTaskState = drive(&mut task).await;

        CompositionFinalizer::new(&store)
            .finalize(&state)
            .await
            .unwrap();
        assert_eq!(store.get_object("dst", "blobs/a").await.unwrap(), data);
        // Destination carries the same composite checksum as the source.
        assert_eq!(
            store.get_checksum("dst", "blobs/a").await.unwrap(),
            store.get_checksum("src", "blobs/a").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_finalize_refuses_on_composite_mismatch() {
        let store = InMemoryStore::new();
        let data: Vec<u8> = bytes(40);
        // Recorded composite computed over *different* bytes: one part's
        // checksum will not match.
        let mut tampered: Vec<u8> = data.clone();
        tampered[25] ^= 0x01;
        let part_etags: Vec<String> = tampered
            .chunks(10)
            .map(|chunk| format!("{:x}", md5::compute(chunk)))
            .collect();
        let recorded: String = compute_composite_etag(&part_etags).unwrap();

        // The copy conditions part copies on the stored checksum, so the
        // checksum must be attached to the actual data object.
        store.seed_object_with_etag("src", "blobs/a", &data, &recorded);

        let mut task = PartitionedCopyTask::begin(
            &store,
            "src",
            "blobs/a",
            "dst",
            "blobs/a",
            CompletionStyle::Multipart,
            CopyOptions::new().with_part_size(10),
        )
        .await
        .unwrap();
        let state: CopyTaskState = drive(&mut task).await;

        let err = CompositionFinalizer::new(&store)
            .finalize(&state)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CompositeMismatch { .. }));
        // Finalization refused: no destination object.
        assert!(!store.exists("dst", "blobs/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_compose_finalize_cleans_up_parts() {
        let store = InMemoryStore::new();
        let data: Vec<u8> = bytes(25);
        store.seed_object("src", "blobs/a", &data);

        let mut task = PartitionedCopyTask::begin(
            &store,
            "src",
            "blobs/a",
            "dst",
            "blobs/a",
            CompletionStyle::Compose,
            CopyOptions::new().with_part_size(10),
        )
        .await
        .unwrap();
        let state: CopyTaskState = drive(&mut task).await;

        CompositionFinalizer::new(&store)
            .finalize(&state)
            .await
            .unwrap();
        assert_eq!(store.get_object("dst", "blobs/a").await.unwrap(), data);
        for part_number in 1..=3u64 {
            let part_key: String = compose_part_key("blobs/a", part_number);
            assert!(!store.exists("dst", &part_key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_single_shot_finalize_is_noop() {
        let store = InMemoryStore::new();
        store.seed_object("src", "blobs/a", &bytes(5));

        let mut task = PartitionedCopyTask::begin(
            &store,
            "src",
            "blobs/a",
            "dst",
            "blobs/a",
            CompletionStyle::Multipart,
            CopyOptions::new().with_part_size(100),
        )
        .await
        .unwrap();
        let state: CopyTaskState = drive(&mut task).await;
        let writes_before: u64 = store.write_count();

        CompositionFinalizer::new(&store)
            .finalize(&state)
            .await
            .unwrap();
        assert_eq!(store.write_count(), writes_before);
    }

    #[tokio::test]
    async fn test_write_metadata_exactly_once() {
        let store = InMemoryStore::new();
        let finalizer = CompositionFinalizer::new(&store);

        let written: bool = finalizer
            .write_metadata("dst", "files/u.v", b"{\"size\":1}", None)
            .await
            .unwrap();
        assert!(written);

        // Identical re-write is benign.
        let written: bool = finalizer
            .write_metadata("dst", "files/u.v", b"{\"size\":1}", None)
            .await
            .unwrap();
        assert!(!written);

        // Different content is a conflict, not an overwrite.
        let err = finalizer
            .write_metadata("dst", "files/u.v", b"{\"size\":2}", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MetadataConflict { .. }));
        assert_eq!(
            store.get_object("dst", "files/u.v").await.unwrap(),
            b"{\"size\":1}"
        );
    }
}
