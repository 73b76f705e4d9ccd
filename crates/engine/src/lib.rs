//! Resumable chunked-execution engine and cross-replica sync orchestration.
//!
//! This crate drives content-addressed blob replication between storage
//! replicas under hard per-invocation time budgets:
//!
//! - **Runner** - generic checkpointed execution: a task performs bounded
//!   units of work, and the runner bails out and schedules a continuation
//!   before the remaining budget could be exceeded
//! - **PartitionedCopyTask** - multipart parallel copy: fixed-size parts,
//!   missing-part reconciliation against the destination's authoritative
//!   part listing, idempotent re-entry
//! - **CompositionFinalizer** - checksum-verified completion (multipart
//!   complete or compose), exactly-once metadata writes
//! - **SyncOrchestrator** - the per-object state machine: skip-if-exists,
//!   dependency gating for manifests, size-based copy dispatch
//! - **RetryReaper** - bounded dead-letter reprocessing
//! - **SyncService** - `start_copy`/`get_status` entry points for
//!   collaborators, with an explicit per-replica client pool

mod copy;
mod error;
mod finalize;
mod reaper;
mod runner;
mod service;
mod sync;

pub use copy::{CopyOptions, CopyTaskState, PartitionedCopyTask};
pub use error::{ErrorClass, SyncError};
pub use finalize::CompositionFinalizer;
pub use reaper::{DeadLetterQueue, InMemoryDeadLetterQueue, ReapStats, RetryEnvelope, RetryReaper};
pub use runner::{ChunkedTask, DeadlineRuntime, Runner, Runtime};
pub use service::{
    resume_task, ClientPool, Continuation, StatusReport, SyncService, TaskId, TaskKind, TaskStatus,
};
pub use sync::{SyncEvent, SyncOrchestrator, SyncSettings, SyncState};
