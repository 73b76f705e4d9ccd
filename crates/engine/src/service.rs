//! Service surface: replica registry, task tracking, and the copy entry
//! points.
//!
//! `SyncService` owns the replica definitions and a store client per
//! replica, starts background syncs, and answers status polls. Checkpoints
//! handed back by an execution harness are rehydrated through
//! [`resume_task`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tokio::task::JoinHandle;

use blobsync_store::{BlobStore, Replica};

use crate::copy::{CopyOptions, CopyTaskState, PartitionedCopyTask};
use crate::error::{ErrorClass, SyncError};
use crate::sync::{SyncEvent, SyncOrchestrator, SyncSettings};

/// Store clients keyed by replica name.
#[derive(Default, Clone)]
pub struct ClientPool {
    clients: HashMap<String, Arc<dyn BlobStore>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client serving a replica's buckets.
    pub fn register(&mut self, replica_name: impl Into<String>, client: Arc<dyn BlobStore>) {
        self.clients.insert(replica_name.into(), client);
    }

    /// Client for a replica, or [`SyncError::UnknownReplica`].
    pub fn get(&self, replica_name: &str) -> Result<Arc<dyn BlobStore>, SyncError> {
        self.clients
            .get(replica_name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownReplica {
                name: replica_name.to_string(),
            })
    }
}

/// Kinds of resumable task a checkpoint can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PartitionedCopy,
}

/// A serialized checkpoint tagged with the task kind that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    /// Task kind the checkpoint belongs to.
    pub kind: TaskKind,
    /// Checkpoint document, opaque to everything but the owning task.
    pub state: Value,
}

/// Rebuild a task from a continuation so a fresh invocation can pick up
/// where the previous one stopped.
pub fn resume_task<'a>(
    store: &'a dyn BlobStore,
    continuation: Continuation,
    options: CopyOptions,
) -> Result<PartitionedCopyTask<'a>, SyncError> {
    match continuation.kind {
        TaskKind::PartitionedCopy => {
            let state: CopyTaskState = serde_json::from_value(continuation.state)?;
            Ok(PartitionedCopyTask::resume(store, state, options))
        }
    }
}

/// Opaque handle for a started sync, returned to the caller for polling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a started sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed { cause: String },
}

/// Answer to a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: TaskStatus,
    /// How long the caller should wait before polling again, when the
    /// task is still running.
    pub retry_after: Option<Duration>,
}

/// One tracked sync: its current status plus the handle of its background
/// run, kept so shutdown or an awaiting caller can observe abandonment.
struct TaskEntry {
    status: TaskStatus,
    handle: Option<JoinHandle<()>>,
}

/// Starts and tracks cross-replica syncs.
pub struct SyncService {
    pool: ClientPool,
    replicas: HashMap<String, Replica>,
    settings: SyncSettings,
    tasks: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
}

impl SyncService {
    pub fn new(pool: ClientPool, settings: SyncSettings) -> Self {
        Self {
            pool,
            replicas: HashMap::new(),
            settings,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a replica definition.
    pub fn with_replica(mut self, replica: Replica) -> Self {
        self.replicas.insert(replica.name.clone(), replica);
        self
    }

    fn replica(&self, name: &str) -> Result<Replica, SyncError> {
        self.replicas
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownReplica {
                name: name.to_string(),
            })
    }

    /// Start copying `key` from one replica to another.
    ///
    /// Returns immediately once the sync is underway. An object already
    /// present at the destination yields a `Succeeded` task without any
    /// write being issued.
    pub async fn start_copy(
        &self,
        source_replica: &str,
        dest_replica: &str,
        key: &str,
    ) -> Result<TaskId, SyncError> {
        if source_replica == dest_replica {
            return Err(SyncError::InvalidReplicaPair {
                name: source_replica.to_string(),
            });
        }
        let source: Replica = self.replica(source_replica)?;
        let dest: Replica = self.replica(dest_replica)?;
        // The destination replica's client serves the whole pair.
        let store: Arc<dyn BlobStore> = self.pool.get(dest_replica)?;

        let task_id = TaskId::generate();
        if store.exists(&dest.bucket, key).await? {
            tracing::debug!(%task_id, key, "destination already holds object");
            self.tasks.lock().unwrap().insert(
                task_id.clone(),
                TaskEntry {
                    status: TaskStatus::Succeeded,
                    handle: None,
                },
            );
            return Ok(task_id);
        }

        let size: u64 = store.get_size(&source.bucket, key).await?;
        let event = SyncEvent::new(source_replica, dest_replica, key, size);

        self.tasks.lock().unwrap().insert(
            task_id.clone(),
            TaskEntry {
                status: TaskStatus::Running,
                handle: None,
            },
        );
        tracing::info!(%task_id, key, size, source = source_replica, dest = dest_replica, "starting copy");

        let tasks = Arc::clone(&self.tasks);
        let settings = self.settings.clone();
        let id = task_id.clone();
        let handle: JoinHandle<()> = tokio::spawn(async move {
            let orchestrator =
                SyncOrchestrator::new(store.as_ref(), source, dest, settings.clone());
            let status: TaskStatus = run_with_retry(&orchestrator, event, &settings, &id).await;
            if let Some(entry) = tasks.lock().unwrap().get_mut(&id) {
                entry.status = status;
            }
        });
        if let Some(entry) = self.tasks.lock().unwrap().get_mut(&task_id) {
            entry.handle = Some(handle);
        }

        Ok(task_id)
    }

    /// Poll a started sync.
    pub fn get_status(&self, task_id: &TaskId) -> StatusReport {
        let status: TaskStatus = self
            .tasks
            .lock()
            .unwrap()
            .get(task_id)
            .map(|entry| entry.status.clone())
            .unwrap_or(TaskStatus::Failed {
                cause: "unknown task".to_string(),
            });
        let retry_after: Option<Duration> = match status {
            TaskStatus::Running => Some(self.settings.status_retry_after),
            _ => None,
        };
        StatusReport {
            status,
            retry_after,
        }
    }

    /// Wait for a started sync to reach a terminal state.
    ///
    /// Unlike polling, this observes abandonment: a background run that
    /// was cancelled or panicked reports as failed instead of leaving the
    /// task running forever.
    pub async fn await_task(&self, task_id: &TaskId) -> StatusReport {
        let handle: Option<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(|entry| entry.handle.take());
        if let Some(handle) = handle {
            if let Err(join_error) = handle.await {
                tracing::error!(%task_id, %join_error, "background sync abandoned");
                if let Some(entry) = self.tasks.lock().unwrap().get_mut(task_id) {
                    entry.status = TaskStatus::Failed {
                        cause: format!("background sync abandoned: {}", join_error),
                    };
                }
            }
        }
        self.get_status(task_id)
    }
}

/// Run the orchestrator, retrying whole runs that fail transiently with
/// exponential backoff up to the configured attempt budget. Re-runs are
/// safe: dispatch short-circuits once the object is durable, and part
/// copies are idempotent.
async fn run_with_retry(
    orchestrator: &SyncOrchestrator<'_>,
    event: SyncEvent,
    settings: &SyncSettings,
    task_id: &TaskId,
) -> TaskStatus {
    let mut attempt: u32 = 1;
    loop {
        match orchestrator.run(event.clone()).await {
            Ok(_) => return TaskStatus::Succeeded,
            Err(error)
                if error.class() == ErrorClass::Transient
                    && attempt < settings.retry.max_attempts =>
            {
                let backoff: Duration = settings.retry.backoff_for_attempt(attempt);
                tracing::warn!(
                    %task_id,
                    %error,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::error!(%task_id, %error, attempt, "copy failed");
                return TaskStatus::Failed {
                    cause: error.to_string(),
                };
            }
        }
    }
}
