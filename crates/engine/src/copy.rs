//! Partitioned, resumable blob copies.
//!
//! A [`PartitionedCopyTask`] copies one blob between buckets in fixed-size
//! parts. Every unit of work re-derives the set of still-missing parts
//! from the destination's authoritative part listing, so a worker that
//! dies mid-copy simply leaves its parts missing for the next invocation —
//! re-entry is idempotent and needs no locks. In a multi-worker topology
//! each worker owns the shard `part_number % worker_count == worker_id`.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use blobsync_common::{
    multipart_part_count, part_count_for, part_size_for, part_size_matching,
    DEFAULT_COPY_CONCURRENCY, DEFAULT_UNIT_PART_BATCH,
};
use blobsync_store::{compose_part_key, BlobStore, ByteRange, CompletionStyle, StoreError};

use crate::error::SyncError;
use crate::runner::ChunkedTask;

/// Serializable checkpoint of a partitioned copy.
///
/// Created by [`PartitionedCopyTask::begin`], mutated by every unit that
/// completes parts, and discarded once the destination object is
/// finalized. Round-trips losslessly through JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyTaskState {
    /// Source bucket.
    pub src_bucket: String,
    /// Source key.
    pub src_key: String,
    /// Destination bucket.
    pub dst_bucket: String,
    /// Destination key.
    pub dst_key: String,
    /// Source checksum recorded at setup; every part copy is conditioned
    /// on it.
    pub source_etag: String,
    /// Total object size in bytes.
    pub size: u64,
    /// Part size in bytes.
    pub part_size: u64,
    /// Total part count.
    pub part_count: u64,
    /// Completion family of the destination replica.
    pub completion: CompletionStyle,
    /// Multipart upload id; absent for single-shot and compose-style
    /// copies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    /// First part index not yet confirmed present at the destination.
    pub next_part: u64,
    /// True once all parts are confirmed present.
    pub finished: bool,
}

/// Options for partitioned copies.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Fixed part size; when absent the part-size policy applies
    /// (matching the source's multipart split where recoverable).
    pub part_size: Option<u64>,
    /// Maximum parts copied during one unit of work.
    pub unit_part_batch: usize,
    /// Concurrent part copies within one unit.
    pub copy_concurrency: usize,
    /// Workers sharing this copy; each owns a disjoint shard of part
    /// indices.
    pub worker_count: u64,
    /// This worker's shard (`0..worker_count`).
    pub worker_id: u64,
    /// Seed for the runner's unit-runtime tracking.
    pub expected_unit_runtime: Duration,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            part_size: None,
            unit_part_batch: DEFAULT_UNIT_PART_BATCH,
            copy_concurrency: DEFAULT_COPY_CONCURRENCY,
            worker_count: 1,
            worker_id: 0,
            expected_unit_runtime: Duration::from_secs(10),
        }
    }
}

impl CopyOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the part size instead of deriving it from the source.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Set the per-unit part batch size.
    pub fn with_unit_part_batch(mut self, batch: usize) -> Self {
        self.unit_part_batch = batch.max(1);
        self
    }

    /// Set concurrent part copies within one unit.
    pub fn with_copy_concurrency(mut self, concurrency: usize) -> Self {
        self.copy_concurrency = concurrency.max(1);
        self
    }

    /// Assign this task one shard of a multi-worker copy.
    pub fn with_worker_shard(mut self, worker_id: u64, worker_count: u64) -> Self {
        self.worker_id = worker_id;
        self.worker_count = worker_count.max(1);
        self
    }
}

/// Result of one missing-part scan.
struct MissingScan {
    /// Missing part indices in ascending order, at most the scan limit.
    missing: Vec<u64>,
    /// First index not examined (meaningful when the scan was cut short).
    resume_at: u64,
    /// True when the scan examined every index through `part_count`.
    exhausted: bool,
}

/// Copies one blob between buckets in resumable, idempotent parts.
pub struct PartitionedCopyTask<'a> {
    store: &'a dyn BlobStore,
    state: CopyTaskState,
    options: CopyOptions,
}

impl<'a> PartitionedCopyTask<'a> {
    /// Inspect the source and set up a copy.
    ///
    /// Small objects (a single part) are copied immediately and the task
    /// starts out finished. Larger multipart-style copies open a multipart
    /// upload at the destination; compose-style copies write transient
    /// part blobs and need no upload handle.
    pub async fn begin(
        store: &'a dyn BlobStore,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        completion: CompletionStyle,
        options: CopyOptions,
    ) -> Result<PartitionedCopyTask<'a>, SyncError> {
        let info = store
            .head_object(src_bucket, src_key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?;

        let part_size: u64 = match options.part_size {
            Some(part_size) => part_size,
            // Recover the source's own split when its ETag is composite, so
            // the finalizer's composite checksum can match; otherwise apply
            // the size policy.
            None => match multipart_part_count(&info.etag) {
                Some(count) => part_size_matching(info.size, count),
                None => part_size_for(info.size),
            },
        };
        let part_count: u64 = part_count_for(info.size, part_size);

        let mut state = CopyTaskState {
            src_bucket: src_bucket.to_string(),
            src_key: src_key.to_string(),
            dst_bucket: dst_bucket.to_string(),
            dst_key: dst_key.to_string(),
            source_etag: info.etag,
            size: info.size,
            part_size,
            part_count,
            completion,
            upload_id: None,
            next_part: 1,
            finished: false,
        };

        if part_count <= 1 {
            store
                .copy_object(src_bucket, src_key, dst_bucket, dst_key)
                .await?;
            state.next_part = part_count + 1;
            state.finished = true;
            tracing::info!(src = %src_key, dst = %dst_key, size = state.size, "single-shot copy");
        } else {
            if completion == CompletionStyle::Multipart {
                state.upload_id = Some(store.create_multipart(dst_bucket, dst_key).await?);
            }
            tracing::info!(
                src = %src_key,
                dst = %dst_key,
                size = state.size,
                part_count,
                "starting partitioned copy"
            );
        }

        Ok(Self {
            store,
            state,
            options,
        })
    }

    /// Reconstruct a task from checkpointed state.
    pub fn resume(
        store: &'a dyn BlobStore,
        state: CopyTaskState,
        options: CopyOptions,
    ) -> PartitionedCopyTask<'a> {
        Self {
            store,
            state,
            options,
        }
    }

    /// Current checkpoint (the cursor is the first part index not yet
    /// confirmed present).
    pub fn progress(&self) -> &CopyTaskState {
        &self.state
    }

    /// Diff the destination's authoritative part listing against the full
    /// expected index range, starting from the cursor.
    async fn scan_missing(&self, limit: usize) -> Result<MissingScan, SyncError> {
        let state = &self.state;
        let mut missing: Vec<u64> = Vec::new();
        let mut next: u64 = state.next_part;

        let push_gap_until = |missing: &mut Vec<u64>, next: &mut u64, bound: u64| -> bool {
            while *next < bound {
                if missing.len() == limit {
                    return false;
                }
                missing.push(*next);
                *next += 1;
            }
            true
        };

        match state.completion {
            CompletionStyle::Multipart => {
                let upload_id: &str =
                    state.upload_id.as_deref().ok_or_else(|| SyncError::Internal {
                        message: format!("multipart copy of {} has no upload id", state.dst_key),
                    })?;
                let mut marker: Option<u64> = (state.next_part > 1).then(|| state.next_part - 1);

                loop {
                    let page = self
                        .store
                        .list_parts(&state.dst_bucket, &state.dst_key, upload_id, marker)
                        .await?;
                    for part in &page.parts {
                        if part.part_number < next {
                            continue;
                        }
                        if !push_gap_until(&mut missing, &mut next, part.part_number) {
                            return Ok(MissingScan {
                                missing,
                                resume_at: next,
                                exhausted: false,
                            });
                        }
                        next = part.part_number + 1;
                    }
                    if !page.is_truncated {
                        break;
                    }
                    marker = page.next_part_number_marker;
                }
            }
            CompletionStyle::Compose => {
                let prefix: String = format!("{}.part", state.dst_key);
                let keys = self.store.list_keys(&state.dst_bucket, &prefix).await?;
                let mut present: Vec<u64> = keys
                    .iter()
                    .filter_map(|key| key.strip_prefix(&prefix)?.parse().ok())
                    .collect();
                present.sort_unstable();

                for part_number in present {
                    if part_number < next {
                        continue;
                    }
                    if !push_gap_until(&mut missing, &mut next, part_number) {
                        return Ok(MissingScan {
                            missing,
                            resume_at: next,
                            exhausted: false,
                        });
                    }
                    next = part_number + 1;
                }
            }
        }

        if !push_gap_until(&mut missing, &mut next, state.part_count + 1) {
            return Ok(MissingScan {
                missing,
                resume_at: next,
                exhausted: false,
            });
        }
        Ok(MissingScan {
            missing,
            resume_at: state.part_count + 1,
            exhausted: true,
        })
    }

    /// Copy one part's byte range, conditioned on the recorded source
    /// checksum.
    async fn copy_part(&self, part_number: u64) -> Result<(), SyncError> {
        let state = &self.state;
        let range = ByteRange::for_part(part_number, state.part_size, state.size);

        let result = match state.completion {
            CompletionStyle::Multipart => {
                let upload_id: &str =
                    state.upload_id.as_deref().ok_or_else(|| SyncError::Internal {
                        message: format!("multipart copy of {} has no upload id", state.dst_key),
                    })?;
                self.store
                    .upload_part_copy(
                        &state.dst_bucket,
                        &state.dst_key,
                        upload_id,
                        part_number,
                        range,
                        &state.src_bucket,
                        &state.src_key,
                        &state.source_etag,
                    )
                    .await
            }
            CompletionStyle::Compose => {
                let part_key: String = compose_part_key(&state.dst_key, part_number);
                self.store
                    .copy_part_blob(
                        &state.dst_bucket,
                        &part_key,
                        range,
                        &state.src_bucket,
                        &state.src_key,
                        &state.source_etag,
                    )
                    .await
            }
        };

        match result {
            Ok(_etag) => {
                tracing::debug!(dst = %state.dst_key, part_number, "copied part");
                Ok(())
            }
            // The source mutated under us: fatal for this task instance.
            Err(StoreError::SourceModified {
                key,
                expected,
                actual,
            }) => Err(SyncError::SourceChanged {
                key,
                expected,
                actual,
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ChunkedTask for PartitionedCopyTask<'_> {
    type Output = CopyTaskState;

    async fn run_one_unit(&mut self) -> Result<Option<CopyTaskState>, SyncError> {
        if self.state.finished {
            return Ok(Some(self.state.clone()));
        }

        // Scan wide enough that this worker's shard gets a full batch even
        // when other workers' parts dominate the gap list.
        let scan_limit: usize =
            self.options.unit_part_batch * self.options.worker_count.max(1) as usize;
        let scan: MissingScan = self.scan_missing(scan_limit).await?;

        if scan.missing.is_empty() && scan.exhausted {
            self.state.next_part = self.state.part_count + 1;
            self.state.finished = true;
            return Ok(Some(self.state.clone()));
        }

        let worker_count: u64 = self.options.worker_count.max(1);
        let mine: Vec<u64> = scan
            .missing
            .iter()
            .copied()
            .filter(|part_number| part_number % worker_count == self.options.worker_id)
            .take(self.options.unit_part_batch)
            .collect();

        let results: Vec<Result<(), SyncError>> = stream::iter(mine.iter().copied())
            .map(|part_number| self.copy_part(part_number))
            .buffer_unordered(self.options.copy_concurrency.max(1))
            .collect()
            .await;
        for result in results {
            result?;
        }

        // Advance the cursor past every part confirmed present or copied in
        // this unit; parts owned by other workers hold it back until the
        // listing shows them.
        let copied: BTreeSet<u64> = mine.into_iter().collect();
        self.state.next_part = match scan
            .missing
            .iter()
            .find(|part_number| !copied.contains(part_number))
        {
            Some(&first_gap) => first_gap,
            None => scan.resume_at,
        };

        Ok(None)
    }

    fn expected_max_unit_runtime(&self) -> Duration {
        self.options.expected_unit_runtime
    }

    fn state(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(&self.state)?)
    }
}
