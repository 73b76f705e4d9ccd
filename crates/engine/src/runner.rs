//! Checkpointed execution of chunked tasks.
//!
//! A task exposes its work as bounded units; the runner executes units
//! until the remaining invocation budget can no longer safely absorb
//! another one, then serializes the task and schedules a continuation for
//! a future, independent invocation (possibly on another machine).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use blobsync_common::TIME_OVERHEAD_FACTOR;

use crate::error::SyncError;

/// A resumable task executed one bounded unit at a time.
///
/// Implementations must be reconstructible from the snapshot returned by
/// [`state`](ChunkedTask::state): a continuation runs in a fresh process
/// with no access to this instance.
#[async_trait]
pub trait ChunkedTask: Send {
    /// Terminal result produced when the task completes.
    type Output: Send;

    /// Execute one bounded increment of work.
    ///
    /// # Returns
    /// `Some(output)` once the task is done, `None` while work remains.
    ///
    /// # Errors
    /// Errors propagate uncaught out of the runner; the execution harness
    /// decides whether the triggering event is redelivered.
    async fn run_one_unit(&mut self) -> Result<Option<Self::Output>, SyncError>;

    /// Expected upper bound on a single unit's runtime, used to seed the
    /// runner's budget tracking before any unit has been observed.
    fn expected_max_unit_runtime(&self) -> Duration;

    /// Snapshot sufficient to reconstruct an equivalent task.
    fn state(&self) -> Result<Value, SyncError>;
}

/// Execution context for one bounded-lifetime invocation.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Budget left in the current invocation.
    fn remaining_time(&self) -> Duration;

    /// Re-enqueue serialized task state for a future, independent
    /// invocation.
    async fn schedule_continuation(&self, state: Value) -> Result<(), SyncError>;
}

/// Drives a [`ChunkedTask`] within a [`Runtime`]'s budget.
///
/// The runner never starts a unit it does not have a reasonable
/// expectation of completing: after every unit it compares the remaining
/// budget against `observed_max * overhead_factor`, where `observed_max`
/// tracks the single worst unit duration directly and otherwise decays by
/// averaging toward recent durations.
pub struct Runner<'a> {
    runtime: &'a dyn Runtime,
    overhead_factor: f64,
}

impl<'a> Runner<'a> {
    /// Create a runner with the default overhead factor.
    pub fn new(runtime: &'a dyn Runtime) -> Self {
        Self {
            runtime,
            overhead_factor: TIME_OVERHEAD_FACTOR,
        }
    }

    /// Override the slack multiplier applied before attempting another
    /// unit.
    pub fn with_overhead_factor(mut self, overhead_factor: f64) -> Self {
        self.overhead_factor = overhead_factor;
        self
    }

    /// Run `task` until it completes or the budget runs low.
    ///
    /// # Returns
    /// `Some(output)` when the task ran to completion within this
    /// invocation; `None` after a continuation was scheduled.
    ///
    /// # Errors
    /// Task errors propagate unchanged; no continuation is scheduled for a
    /// failed unit.
    pub async fn run<T: ChunkedTask>(&self, task: &mut T) -> Result<Option<T::Output>, SyncError> {
        let mut observed_max: Duration = task.expected_max_unit_runtime();

        loop {
            let before: Duration = self.runtime.remaining_time();
            if let Some(output) = task.run_one_unit().await? {
                return Ok(Some(output));
            }
            let after: Duration = self.runtime.remaining_time();

            let duration: Duration = before.saturating_sub(after);
            observed_max = if duration > observed_max {
                duration
            } else {
                (observed_max + duration) / 2
            };

            if after < observed_max.mul_f64(self.overhead_factor) {
                tracing::debug!(
                    remaining_ms = after.as_millis() as u64,
                    observed_max_ms = observed_max.as_millis() as u64,
                    "budget low, scheduling continuation"
                );
                break;
            }
        }

        let state: Value = task.state()?;
        self.runtime.schedule_continuation(state).await?;
        Ok(None)
    }
}

/// [`Runtime`] backed by a wall-clock deadline.
///
/// Continuations are parked in-process for the driver to pick up; an
/// external scheduler integration would publish them instead.
pub struct DeadlineRuntime {
    deadline: Instant,
    continuation: Mutex<Option<Value>>,
}

impl DeadlineRuntime {
    /// Create a runtime whose budget expires `budget` from now.
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            continuation: Mutex::new(None),
        }
    }

    /// Take the continuation scheduled during this invocation, if any.
    pub fn take_continuation(&self) -> Option<Value> {
        self.continuation.lock().unwrap().take()
    }
}

#[async_trait]
impl Runtime for DeadlineRuntime {
    fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    async fn schedule_continuation(&self, state: Value) -> Result<(), SyncError> {
        *self.continuation.lock().unwrap() = Some(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runtime whose `remaining_time` answers come from a script, for
    /// deterministic budget tests. Values are consumed in order; the last
    /// value repeats once the script is exhausted.
    struct ScriptedRuntime {
        script: Vec<Duration>,
        cursor: AtomicUsize,
        continuation: Mutex<Option<Value>>,
    }

    impl ScriptedRuntime {
        fn from_millis(script: &[u64]) -> Self {
            Self {
                script: script.iter().map(|&ms| Duration::from_millis(ms)).collect(),
                cursor: AtomicUsize::new(0),
                continuation: Mutex::new(None),
            }
        }

        fn continuation(&self) -> Option<Value> {
            self.continuation.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Runtime for ScriptedRuntime {
        fn remaining_time(&self) -> Duration {
            let index: usize = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.script[index.min(self.script.len() - 1)]
        }

        async fn schedule_continuation(&self, state: Value) -> Result<(), SyncError> {
            *self.continuation.lock().unwrap() = Some(state);
            Ok(())
        }
    }

    /// Task that counts units and completes after a fixed number.
    struct CountingTask {
        units_run: u32,
        units_total: Option<u32>,
        fail_at: Option<u32>,
    }

    impl CountingTask {
        fn endless() -> Self {
            Self {
                units_run: 0,
                units_total: None,
                fail_at: None,
            }
        }

        fn completing_after(units: u32) -> Self {
            Self {
                units_run: 0,
                units_total: Some(units),
                fail_at: None,
            }
        }
    }

    #[async_trait]
    impl ChunkedTask for CountingTask {
        type Output = u32;

        async fn run_one_unit(&mut self) -> Result<Option<u32>, SyncError> {
            self.units_run += 1;
            if self.fail_at == Some(self.units_run) {
                return Err(SyncError::Internal {
                    message: "unit failed".into(),
                });
            }
            Ok(match self.units_total {
                Some(total) if self.units_run >= total => Some(self.units_run),
                _ => None,
            })
        }

        fn expected_max_unit_runtime(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn state(&self) -> Result<Value, SyncError> {
            Ok(json!({ "units_run": self.units_run }))
        }
    }

    #[tokio::test]
    async fn test_completion_within_budget() {
        let runtime = ScriptedRuntime::from_millis(&[1_000, 990, 980, 970]);
        let mut task = CountingTask::completing_after(2);

        let output = Runner::new(&runtime).run(&mut task).await.unwrap();
        assert_eq!(output, Some(2));
        assert!(runtime.continuation().is_none());
    }

    #[tokio::test]
    async fn test_bails_out_before_budget_exhausted() {
        // Units take ~10ms against a 10ms expectation, factor 2.0:
        // the runner must stop as soon as remaining < ~20ms.
        let runtime = ScriptedRuntime::from_millis(&[100, 90, 88, 78, 76, 66, 64, 15]);
        let mut task = CountingTask::endless();

        let output = Runner::new(&runtime).run(&mut task).await.unwrap();
        assert_eq!(output, None);
        // Four units ran (the fourth observed remaining=15 < threshold).
        assert_eq!(task.units_run, 4);
        assert_eq!(runtime.continuation(), Some(json!({ "units_run": 4 })));
    }

    #[tokio::test]
    async fn test_never_runs_with_less_than_factored_slack() {
        // After the first unit, every subsequent run_one_unit call must have
        // been preceded by remaining >= observed_max * factor.
        let script: &[u64] = &[50, 39, 38, 27, 26, 15, 14, 3];
        let runtime = ScriptedRuntime::from_millis(script);
        let mut task = CountingTask::endless();

        Runner::new(&runtime).run(&mut task).await.unwrap();

        // expected_max starts at 10ms; every unit takes ~11ms, so
        // observed_max stays >= 10ms and the threshold >= 20ms. The unit
        // starting at remaining=26 is the last allowed; remaining=15 is not.
        assert_eq!(task.units_run, 3);
    }

    #[tokio::test]
    async fn test_worst_case_unit_dominates_smoothing() {
        // One slow unit (450ms) must raise the threshold immediately: with
        // 550ms left and a 450ms worst case, no further unit may start.
        let runtime = ScriptedRuntime::from_millis(&[1_000, 550]);
        let mut task = CountingTask::endless();

        Runner::new(&runtime).run(&mut task).await.unwrap();
        assert_eq!(task.units_run, 1);
        assert!(runtime.continuation().is_some());
    }

    #[tokio::test]
    async fn test_unit_errors_propagate_without_continuation() {
        let runtime = ScriptedRuntime::from_millis(&[1_000, 990]);
        let mut task = CountingTask::endless();
        task.fail_at = Some(2);

        let err = Runner::new(&runtime).run(&mut task).await.unwrap_err();
        assert!(matches!(err, SyncError::Internal { .. }));
        assert!(runtime.continuation().is_none());
    }

    #[tokio::test]
    async fn test_deadline_runtime_counts_down() {
        let runtime = DeadlineRuntime::new(Duration::from_secs(60));
        let first: Duration = runtime.remaining_time();
        assert!(first <= Duration::from_secs(60));
        assert!(first > Duration::from_secs(59));

        runtime
            .schedule_continuation(json!({ "cursor": 7 }))
            .await
            .unwrap();
        assert_eq!(runtime.take_continuation(), Some(json!({ "cursor": 7 })));
        assert_eq!(runtime.take_continuation(), None);
    }
}
