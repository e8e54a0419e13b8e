//! Writer stages
//!
//! Each status queue is drained by its own writer: batches are popped in
//! FIFO order and persisted under a database transaction. A failed batch is
//! re-enqueued whole, preserving at-least-once semantics; terminal-status
//! writes are idempotent, so duplicates are safe.

pub mod invalid;
pub mod processed;
pub mod processing;

pub use invalid::InvalidWriter;
pub use processed::ProcessedWriter;
pub use processing::ProcessingWriter;

use crate::accrual;
use crate::models::{OrderId, OrderStatus};
use crate::store::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Batched order-status persistence, used by the INVALID and PROCESSING
/// writers.
#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    async fn update_status(&self, ids: &[OrderId], status: OrderStatus) -> Result<(), StoreError>;
}

/// Transactional accrual application, used by the PROCESSED writer.
#[async_trait]
pub trait AccrualStore: Send + Sync + 'static {
    async fn accrue_batch(&self, accruals: HashMap<OrderId, f64>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub batch_size: usize,
    pub no_tasks_delay: Duration,
    pub failed_task_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: accrual::DEFAULT_CONCURRENCY,
            batch_size: accrual::DEFAULT_BATCH_SIZE,
            no_tasks_delay: accrual::DEFAULT_NO_TASKS_DELAY,
            failed_task_delay: accrual::DEFAULT_FAILED_TASK_DELAY,
        }
    }
}
