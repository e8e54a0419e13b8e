//! Accrual pipeline
//!
//! Five long-running stages cooperate through bounded in-memory queues:
//! the retriever polls the external accrual service for queued order ids,
//! the router classifies responses by status, and three writers batch the
//! terminal (and not-yet-terminal) outcomes into PostgreSQL. Orders loop
//! back to the head of the pipeline until they reach a terminal status.

pub mod client;
pub mod response;
pub mod retriever;
pub mod router;
pub mod writer;

pub use client::{AccrualClient, ClientConfig, ClientError};
pub use response::{AccrualResponse, AccrualStatus};

use crate::queue::Queue;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_NO_TASKS_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_FAILED_TASK_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_NO_CHANGES_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_NOT_FINAL_STATUS_DELAY: Duration = Duration::from_secs(60);

/// Nominal capacity of every inter-stage queue.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Sleep in `poll_delay` increments until `queue` has at least one item.
/// Returns `false` when the surrounding stage is cancelled.
pub(crate) async fn wait_for_items<T: Send + 'static>(
    queue: &Queue<T>,
    poll_delay: Duration,
    cancel: &CancellationToken,
) -> bool {
    while queue.count() == 0 {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(poll_delay) => {}
        }
    }

    true
}
