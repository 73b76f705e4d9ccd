//! Per-object replica synchronization state machine.
//!
//! Each sync runs an explicit finite-state machine: `Dispatch` decides the
//! copy strategy, `CheckDeps`/`Wait` gate manifests until everything they
//! reference exists at the destination, the copy states perform the
//! transfer, and `Quit` ends the run. The machine is re-entrant: running
//! `Dispatch` for an already-replicated object is a cheap no-op.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use blobsync_common::{RetrySettings, DEFAULT_DEPENDENCY_WAIT, DEFAULT_SINGLE_SHOT_THRESHOLD};
use blobsync_store::{
    BlobStore, BundleManifest, CollectionManifest, FileManifest, KeyClass, Replica,
};

use crate::copy::{CopyOptions, CopyTaskState, PartitionedCopyTask};
use crate::error::SyncError;
use crate::finalize::CompositionFinalizer;
use crate::runner::{DeadlineRuntime, Runner};

/// One object's sync request plus the transient routing flags the state
/// machine reads and rewrites at every step. Serializes as a flat JSON
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Replica the object is read from.
    pub source_replica: String,
    /// Replica the object is copied to.
    pub dest_replica: String,
    /// Key of the object at the source (and destination).
    pub source_key: String,
    /// Source object size in bytes.
    pub size: u64,
    /// Set while the machine is waiting on dependencies.
    #[serde(default)]
    pub sleep: bool,
    /// Set when the machine selected the single-request copy path.
    #[serde(default)]
    pub do_oneshot_copy: bool,
    /// Set when the machine selected the partitioned copy path.
    #[serde(default)]
    pub do_multipart_copy: bool,
    /// Set once the object is durable at the destination.
    #[serde(default)]
    pub done: bool,
}

impl SyncEvent {
    /// Create a fresh event with all routing flags clear.
    pub fn new(
        source_replica: impl Into<String>,
        dest_replica: impl Into<String>,
        source_key: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            source_replica: source_replica.into(),
            dest_replica: dest_replica.into(),
            source_key: source_key.into(),
            size,
            sleep: false,
            do_oneshot_copy: false,
            do_multipart_copy: false,
            done: false,
        }
    }
}

/// States of the sync machine. `Compose` carries the finished copy
/// checkpoint forward to finalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    /// Decide the copy strategy (entry state).
    Dispatch,
    /// Verify every entity the manifest references exists at the
    /// destination.
    CheckDeps,
    /// Pause before re-entering `CheckDeps`.
    Wait,
    /// Copy in a single request.
    OneshotCopy,
    /// Drive a partitioned copy to all-parts-present.
    MultipartCopy,
    /// Verify checksums and finalize the destination object.
    Compose(CopyTaskState),
    /// Terminal state.
    Quit,
}

/// Settings for sync orchestration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Blobs above this size take the partitioned copy path.
    pub single_shot_threshold: u64,
    /// Pause between dependency checks.
    pub dependency_wait: Duration,
    /// Budget of each runner invocation while driving a partitioned copy.
    pub invocation_budget: Duration,
    /// Hint returned to status pollers while a task is running.
    pub status_retry_after: Duration,
    /// Partitioned copy options.
    pub copy: CopyOptions,
    /// Bounded retry of whole runs that fail transiently.
    pub retry: RetrySettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            single_shot_threshold: DEFAULT_SINGLE_SHOT_THRESHOLD,
            dependency_wait: DEFAULT_DEPENDENCY_WAIT,
            invocation_budget: Duration::from_secs(240),
            status_retry_after: Duration::from_secs(2),
            copy: CopyOptions::default(),
            retry: RetrySettings::default(),
        }
    }
}

/// Drives one [`SyncEvent`] through the state machine.
pub struct SyncOrchestrator<'a> {
    store: &'a dyn BlobStore,
    source: Replica,
    dest: Replica,
    settings: SyncSettings,
}

impl<'a> SyncOrchestrator<'a> {
    /// Create an orchestrator for one replica pair.
    ///
    /// `store` is the capability serving both replicas' buckets.
    pub fn new(
        store: &'a dyn BlobStore,
        source: Replica,
        dest: Replica,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            source,
            dest,
            settings,
        }
    }

    /// Run the machine from `Dispatch` to `Quit`.
    pub async fn run(&self, mut event: SyncEvent) -> Result<SyncEvent, SyncError> {
        let mut state = SyncState::Dispatch;
        while state != SyncState::Quit {
            tracing::debug!(?state, key = %event.source_key, "sync step");
            state = self.step(state, &mut event).await?;
        }
        Ok(event)
    }

    /// Execute one state and return the next. The single interpreter for
    /// the whole machine; transitions happen nowhere else.
    pub async fn step(
        &self,
        state: SyncState,
        event: &mut SyncEvent,
    ) -> Result<SyncState, SyncError> {
        match state {
            SyncState::Dispatch => self.dispatch(event).await,
            SyncState::CheckDeps => self.check_deps(event).await,
            SyncState::Wait => {
                tokio::time::sleep(self.settings.dependency_wait).await;
                event.sleep = false;
                Ok(SyncState::CheckDeps)
            }
            SyncState::OneshotCopy => {
                self.store
                    .copy_object(
                        &self.source.bucket,
                        &event.source_key,
                        &self.dest.bucket,
                        &event.source_key,
                    )
                    .await?;
                event.done = true;
                Ok(SyncState::Quit)
            }
            SyncState::MultipartCopy => {
                let final_state: CopyTaskState = self.drive_partitioned_copy(event).await?;
                Ok(SyncState::Compose(final_state))
            }
            SyncState::Compose(copy_state) => {
                CompositionFinalizer::new(self.store)
                    .finalize(&copy_state)
                    .await?;
                event.done = true;
                Ok(SyncState::Quit)
            }
            SyncState::Quit => Ok(SyncState::Quit),
        }
    }

    /// Entry decision. Checked in order: already-replicated short-circuit,
    /// then dependency gating for manifests, then size-based dispatch.
    async fn dispatch(&self, event: &mut SyncEvent) -> Result<SyncState, SyncError> {
        // Name-equal key at the destination means already replicated,
        // regardless of the path that would have been chosen.
        if self
            .store
            .exists(&self.dest.bucket, &event.source_key)
            .await?
        {
            tracing::debug!(key = %event.source_key, "already replicated, skipping");
            event.done = true;
            return Ok(SyncState::Quit);
        }

        let class: KeyClass = KeyClass::of(&event.source_key);
        if class.has_dependencies() {
            return Ok(SyncState::CheckDeps);
        }
        if class == KeyClass::Blob && event.size > self.settings.single_shot_threshold {
            event.do_multipart_copy = true;
            Ok(SyncState::MultipartCopy)
        } else {
            event.do_oneshot_copy = true;
            Ok(SyncState::OneshotCopy)
        }
    }

    /// Verify the manifest's references exist at the destination; wait and
    /// re-check until they do. The enclosing scheduler's overall timeout
    /// is the backstop for this loop.
    async fn check_deps(&self, event: &mut SyncEvent) -> Result<SyncState, SyncError> {
        let missing: Vec<String> = self.missing_dependencies(&event.source_key).await?;
        if missing.is_empty() {
            event.sleep = false;
            event.do_oneshot_copy = true;
            Ok(SyncState::OneshotCopy)
        } else {
            tracing::info!(
                key = %event.source_key,
                missing = missing.len(),
                first = %missing[0],
                "dependencies not yet replicated, waiting"
            );
            event.sleep = true;
            Ok(SyncState::Wait)
        }
    }

    /// Dependencies of a manifest that are absent at the destination.
    async fn missing_dependencies(&self, key: &str) -> Result<Vec<String>, SyncError> {
        let document: Vec<u8> = self.store.get_object(&self.source.bucket, key).await?;
        let dependencies: Vec<String> = match KeyClass::of(key) {
            KeyClass::File => {
                let manifest: FileManifest = serde_json::from_slice(&document)?;
                vec![manifest.blob_key()]
            }
            KeyClass::Bundle => {
                let manifest: BundleManifest = serde_json::from_slice(&document)?;
                manifest.files.iter().map(|file| file.file_key()).collect()
            }
            KeyClass::Collection => {
                let manifest: CollectionManifest = serde_json::from_slice(&document)?;
                manifest.contents
            }
            _ => Vec::new(),
        };

        let mut missing: Vec<String> = Vec::new();
        for dependency in dependencies {
            if !self.store.exists(&self.dest.bucket, &dependency).await? {
                missing.push(dependency);
            }
        }
        Ok(missing)
    }

    /// Drive a partitioned copy to completion through repeated,
    /// independently-budgeted runner invocations. Each continuation
    /// round-trips the checkpoint through its serialized form, exactly as
    /// an external scheduler would hand it to a fresh process.
    async fn drive_partitioned_copy(
        &self,
        event: &SyncEvent,
    ) -> Result<CopyTaskState, SyncError> {
        let mut task = PartitionedCopyTask::begin(
            self.store,
            &self.source.bucket,
            &event.source_key,
            &self.dest.bucket,
            &event.source_key,
            self.dest.completion,
            self.settings.copy.clone(),
        )
        .await?;

        loop {
            let runtime = DeadlineRuntime::new(self.settings.invocation_budget);
            match Runner::new(&runtime).run(&mut task).await? {
                Some(final_state) => return Ok(final_state),
                None => {
                    let checkpoint =
                        runtime.take_continuation().ok_or_else(|| SyncError::Internal {
                            message: "runner yielded without scheduling a continuation".into(),
                        })?;
                    let state: CopyTaskState = serde_json::from_value(checkpoint)?;
                    task = PartitionedCopyTask::resume(
                        self.store,
                        state,
                        self.settings.copy.clone(),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobsync_store::{CompletionStyle, InMemoryStore};

    fn replicas() -> (Replica, Replica) {
        (
            Replica::new("aws", "src-bucket", CompletionStyle::Multipart),
            Replica::new("aws-backup", "dst-bucket", CompletionStyle::Multipart),
        )
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            single_shot_threshold: 10_000_000,
            dependency_wait: Duration::from_millis(5),
            ..SyncSettings::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_selects_multipart_above_threshold() {
        let store = InMemoryStore::new();
        let (source, dest) = replicas();
        let orchestrator = SyncOrchestrator::new(&store, source, dest, settings());

        let mut event = SyncEvent::new("aws", "aws-backup", "blobs/a.b.c.d", 10_000_001);
        let next = orchestrator
            .step(SyncState::Dispatch, &mut event)
            .await
            .unwrap();
        assert_eq!(next, SyncState::MultipartCopy);
        assert!(event.do_multipart_copy);
        assert!(!event.do_oneshot_copy);
    }

    #[tokio::test]
    async fn test_dispatch_selects_oneshot_at_threshold() {
        let store = InMemoryStore::new();
        let (source, dest) = replicas();
        let orchestrator = SyncOrchestrator::new(&store, source, dest, settings());

        let mut event = SyncEvent::new("aws", "aws-backup", "blobs/a.b.c.d", 10_000_000);
        let next = orchestrator
            .step(SyncState::Dispatch, &mut event)
            .await
            .unwrap();
        assert_eq!(next, SyncState::OneshotCopy);
        assert!(event.do_oneshot_copy);
    }

    #[tokio::test]
    async fn test_dispatch_short_circuits_existing_destination() {
        let store = InMemoryStore::new();
        store.seed_object("src-bucket", "blobs/a.b.c.d", b"data");
        store.seed_object("dst-bucket", "blobs/a.b.c.d", b"data");
        let (source, dest) = replicas();
        let orchestrator = SyncOrchestrator::new(&store, source, dest, settings());

        let mut event = SyncEvent::new("aws", "aws-backup", "blobs/a.b.c.d", 4);
        let next = orchestrator
            .step(SyncState::Dispatch, &mut event)
            .await
            .unwrap();
        assert_eq!(next, SyncState::Quit);
        assert!(event.done);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_routes_manifests_to_dependency_check() {
        let store = InMemoryStore::new();
        let (source, dest) = replicas();
        let orchestrator = SyncOrchestrator::new(&store, source, dest, settings());

        for key in ["files/u.v", "bundles/u.v", "collections/u.v"] {
            let mut event = SyncEvent::new("aws", "aws-backup", key, 512);
            let next = orchestrator
                .step(SyncState::Dispatch, &mut event)
                .await
                .unwrap();
            assert_eq!(next, SyncState::CheckDeps, "key {}", key);
        }
    }

    #[tokio::test]
    async fn test_check_deps_waits_until_blob_present() {
        let store = InMemoryStore::new();
        let manifest = serde_json::json!({
            "sha256": "aa", "sha1": "bb", "s3-etag": "cc", "crc32c": "dd",
            "size": 4,
        });
        store.seed_object(
            "src-bucket",
            "files/u.v",
            serde_json::to_vec(&manifest).unwrap().as_slice(),
        );
        let (source, dest) = replicas();
        let orchestrator = SyncOrchestrator::new(&store, source, dest, settings());

        let mut event = SyncEvent::new("aws", "aws-backup", "files/u.v", 64);
        let next = orchestrator
            .step(SyncState::CheckDeps, &mut event)
            .await
            .unwrap();
        assert_eq!(next, SyncState::Wait);
        assert!(event.sleep);

        // Blob arrives at the destination; the re-check proceeds to copy.
        store.seed_object("dst-bucket", "blobs/aa.bb.cc.dd", b"data");
        let next = orchestrator
            .step(SyncState::CheckDeps, &mut event)
            .await
            .unwrap();
        assert_eq!(next, SyncState::OneshotCopy);
        assert!(!event.sleep);
    }

    #[tokio::test]
    async fn test_run_replicates_small_blob() {
        let store = InMemoryStore::new();
        store.seed_object("src-bucket", "blobs/a.b.c.d", b"small blob");
        let (source, dest) = replicas();
        let orchestrator = SyncOrchestrator::new(&store, source, dest, settings());

        let event = orchestrator
            .run(SyncEvent::new("aws", "aws-backup", "blobs/a.b.c.d", 10))
            .await
            .unwrap();
        assert!(event.done);
        assert_eq!(
            store.get_object("dst-bucket", "blobs/a.b.c.d").await.unwrap(),
            b"small blob"
        );
    }

    #[tokio::test]
    async fn test_event_round_trips_through_json() {
        let mut event = SyncEvent::new("aws", "gcp", "bundles/u.v", 123);
        event.sleep = true;
        let json: String = serde_json::to_string(&event).unwrap();
        let back: SyncEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
