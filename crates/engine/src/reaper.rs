//! Dead-letter retry reaper.
//!
//! Sync events whose processing fails land on a dead-letter queue. The
//! reaper drains that queue on a schedule, republishing each event to the
//! live queue with an incremented retry count, and dropping events that
//! have exhausted their retry budget so one poison event cannot circulate
//! forever.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use blobsync_common::DEFAULT_MAX_RETRIES;

use crate::error::SyncError;

/// A dead-lettered message awaiting redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEnvelope {
    /// Serialized event body, passed through unmodified.
    pub body: String,
    /// Delivery attempts so far. Absent on messages that dead-lettered
    /// before any reaper touched them.
    pub retry_count: Option<u32>,
    /// Opaque handle used to acknowledge this delivery.
    pub receipt_handle: String,
}

/// Queue operations the reaper needs.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Receive up to `max` dead-lettered messages. An empty vec means the
    /// queue is drained.
    async fn receive(&self, max: usize) -> Result<Vec<RetryEnvelope>, SyncError>;

    /// Publish `body` back to the live queue carrying `retry_count`.
    async fn republish(&self, body: &str, retry_count: u32) -> Result<(), SyncError>;

    /// Remove a received message from the dead-letter queue.
    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), SyncError>;
}

/// Statistics from one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    /// Messages returned to the live queue.
    pub republished: u64,
    /// Messages dropped for exhausting their retry budget.
    pub dropped: u64,
}

/// Drains a dead-letter queue, bounding per-message retries.
pub struct RetryReaper<Q: DeadLetterQueue> {
    queue: Q,
    max_retries: u32,
    receive_batch: usize,
}

impl<Q: DeadLetterQueue> RetryReaper<Q> {
    /// Create a reaper with the default retry budget.
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            max_retries: DEFAULT_MAX_RETRIES,
            receive_batch: 10,
        }
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Drain the queue until a receive comes back empty.
    ///
    /// A message whose retry count has already reached the budget is
    /// dropped; anything else is republished with the count incremented.
    /// Every received message is acknowledged either way, so nothing is
    /// processed twice.
    pub async fn drain_once(&self) -> Result<ReapStats, SyncError> {
        let mut stats = ReapStats::default();
        loop {
            let batch: Vec<RetryEnvelope> = self.queue.receive(self.receive_batch).await?;
            if batch.is_empty() {
                return Ok(stats);
            }
            for envelope in batch {
                let retry_count: u32 = envelope.retry_count.unwrap_or(0);
                if retry_count >= self.max_retries {
                    tracing::error!(
                        retry_count,
                        body = %envelope.body,
                        "dropping message that exhausted its retry budget"
                    );
                    stats.dropped += 1;
                } else {
                    self.queue
                        .republish(&envelope.body, retry_count + 1)
                        .await?;
                    stats.republished += 1;
                }
                self.queue.acknowledge(&envelope.receipt_handle).await?;
            }
        }
    }

    /// Drain forever, pausing `poll_interval` between passes. Errors from
    /// a pass are logged and the next pass proceeds.
    pub async fn run(&self, poll_interval: Duration) {
        loop {
            match self.drain_once().await {
                Ok(stats) if stats.republished > 0 || stats.dropped > 0 => {
                    tracing::info!(
                        republished = stats.republished,
                        dropped = stats.dropped,
                        "reaped dead-letter queue"
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, "dead-letter drain failed");
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// In-process queue pair backing tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    dead: Mutex<VecDeque<RetryEnvelope>>,
    live: Mutex<Vec<(String, u32)>>,
    next_receipt: Mutex<u64>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a message on the dead-letter side.
    pub fn dead_letter(&self, body: &str, retry_count: Option<u32>) {
        let mut next = self.next_receipt.lock().unwrap();
        *next += 1;
        self.dead.lock().unwrap().push_back(RetryEnvelope {
            body: body.to_string(),
            retry_count,
            receipt_handle: format!("receipt-{}", *next),
        });
    }

    /// Messages republished to the live queue as (body, retry_count).
    pub fn live_messages(&self) -> Vec<(String, u32)> {
        self.live.lock().unwrap().clone()
    }

    /// Messages still sitting on the dead-letter side.
    pub fn dead_letter_len(&self) -> usize {
        self.dead.lock().unwrap().len()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn receive(&self, max: usize) -> Result<Vec<RetryEnvelope>, SyncError> {
        let mut dead = self.dead.lock().unwrap();
        let take: usize = max.min(dead.len());
        Ok(dead.drain(..take).collect())
    }

    async fn republish(&self, body: &str, retry_count: u32) -> Result<(), SyncError> {
        self.live
            .lock()
            .unwrap()
            .push((body.to_string(), retry_count));
        Ok(())
    }

    async fn acknowledge(&self, _receipt_handle: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_republishes_with_incremented_count() {
        let queue = InMemoryDeadLetterQueue::new();
        queue.dead_letter("{\"key\":\"blobs/a\"}", Some(3));
        queue.dead_letter("{\"key\":\"blobs/b\"}", None);
        let reaper = RetryReaper::new(queue);

        let stats = reaper.drain_once().await.unwrap();
        assert_eq!(stats, ReapStats { republished: 2, dropped: 0 });
        assert_eq!(
            reaper.queue.live_messages(),
            vec![
                ("{\"key\":\"blobs/a\"}".to_string(), 4),
                ("{\"key\":\"blobs/b\"}".to_string(), 1),
            ]
        );
        assert_eq!(reaper.queue.dead_letter_len(), 0);
    }

    #[tokio::test]
    async fn test_final_budgeted_attempt_is_republished() {
        let queue = InMemoryDeadLetterQueue::new();
        queue.dead_letter("body", Some(9));
        let reaper = RetryReaper::new(queue);

        let stats = reaper.drain_once().await.unwrap();
        assert_eq!(stats.republished, 1);
        assert_eq!(reaper.queue.live_messages(), vec![("body".to_string(), 10)]);
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dropped() {
        let queue = InMemoryDeadLetterQueue::new();
        queue.dead_letter("body", Some(10));
        let reaper = RetryReaper::new(queue);

        let stats = reaper.drain_once().await.unwrap();
        assert_eq!(stats, ReapStats { republished: 0, dropped: 1 });
        assert!(reaper.queue.live_messages().is_empty());
        assert_eq!(reaper.queue.dead_letter_len(), 0);
    }

    #[tokio::test]
    async fn test_drains_across_multiple_batches() {
        let queue = InMemoryDeadLetterQueue::new();
        for i in 0..25 {
            queue.dead_letter(&format!("body-{}", i), Some(0));
        }
        let reaper = RetryReaper::new(queue);

        let stats = reaper.drain_once().await.unwrap();
        assert_eq!(stats.republished, 25);
        assert_eq!(reaper.queue.dead_letter_len(), 0);
    }

    #[tokio::test]
    async fn test_custom_budget() {
        let queue = InMemoryDeadLetterQueue::new();
        queue.dead_letter("a", Some(2));
        queue.dead_letter("b", Some(1));
        let reaper = RetryReaper::new(queue).with_max_retries(2);

        let stats = reaper.drain_once().await.unwrap();
        assert_eq!(stats, ReapStats { republished: 1, dropped: 1 });
        assert_eq!(reaper.queue.live_messages(), vec![("b".to_string(), 2)]);
    }
}
