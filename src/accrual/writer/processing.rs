//! Writer for the intermediate PROCESSING status.
//!
//! Persists the status and schedules the batch for another poll, since the
//! external service has not reached a terminal outcome yet.

use super::StatusStore;
use crate::accrual::response::AccrualResponse;
use crate::accrual::{self, wait_for_items};
use crate::models::{OrderId, OrderStatus};
use crate::queue::Queue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub batch_size: usize,
    pub no_tasks_delay: Duration,
    pub failed_task_delay: Duration,
    pub not_final_status_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: accrual::DEFAULT_CONCURRENCY,
            batch_size: accrual::DEFAULT_BATCH_SIZE,
            no_tasks_delay: accrual::DEFAULT_NO_TASKS_DELAY,
            failed_task_delay: accrual::DEFAULT_FAILED_TASK_DELAY,
            not_final_status_delay: accrual::DEFAULT_NOT_FINAL_STATUS_DELAY,
        }
    }
}

pub struct ProcessingWriter<S> {
    order_queue: Queue<OrderId>,
    processing_queue: Queue<AccrualResponse>,
    store: Arc<S>,
    config: Config,
}

impl<S: StatusStore> ProcessingWriter<S> {
    pub fn new(
        order_queue: Queue<OrderId>,
        processing_queue: Queue<AccrualResponse>,
        store: Arc<S>,
        config: Config,
    ) -> Self {
        Self {
            order_queue,
            processing_queue,
            store,
            config,
        }
    }

    /// Stage main loop; returns once `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("processing writer semaphore closed")
                }
            };

            if !wait_for_items(&self.processing_queue, self.config.no_tasks_delay, &cancel).await {
                return Ok(());
            }

            let batch = self.processing_queue.pop_batch(self.config.batch_size);
            if batch.is_empty() {
                error!("processing status queue is empty, but should not");
                continue;
            }

            let store = Arc::clone(&self.store);
            let order_queue = self.order_queue.clone();
            let processing_queue = self.processing_queue.clone();
            let config = self.config.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;
                write_batch(store, order_queue, processing_queue, batch, config, cancel).await;
            });
        }
    }
}

async fn write_batch<S: StatusStore>(
    store: Arc<S>,
    order_queue: Queue<OrderId>,
    processing_queue: Queue<AccrualResponse>,
    batch: Vec<AccrualResponse>,
    config: Config,
    cancel: CancellationToken,
) {
    let ids: Vec<OrderId> = batch.iter().map(|response| response.order_id).collect();

    if let Err(err) = store.update_status(&ids, OrderStatus::Processing).await {
        warn!(error = %err, "can't update orders");
        processing_queue.push_batch_delayed(batch, config.failed_task_delay, &cancel);
        return;
    }

    // Poll again later for a terminal outcome.
    order_queue.push_batch_delayed(ids, config.not_final_status_delay, &cancel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::response::AccrualStatus;
    use crate::accrual::writer::StatusStore;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingStatusStore {
        calls: Mutex<Vec<(Vec<OrderId>, OrderStatus)>>,
        failures_left: AtomicUsize,
    }

    impl RecordingStatusStore {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(failures),
            })
        }

        fn calls(&self) -> Vec<(Vec<OrderId>, OrderStatus)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusStore for RecordingStatusStore {
        async fn update_status(
            &self,
            ids: &[OrderId],
            status: OrderStatus,
        ) -> Result<(), StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }

            self.calls.lock().unwrap().push((ids.to_vec(), status));
            Ok(())
        }
    }

    fn response(order_id: OrderId) -> AccrualResponse {
        AccrualResponse {
            order_id,
            status: AccrualStatus::Processing,
            accrual: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn written_orders_are_scheduled_for_another_poll() {
        let order_queue = Queue::new(16);
        let processing_queue = Queue::new(16);
        processing_queue.push(response(7)).await;

        let store = RecordingStatusStore::new(0);
        let writer = ProcessingWriter::new(
            order_queue.clone(),
            processing_queue.clone(),
            Arc::clone(&store),
            Config::default(),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { writer.run(cancel).await })
        };

        // The order id comes back to the order queue after the re-poll delay.
        loop {
            if let Some(order_id) = order_queue.pop() {
                assert_eq!(order_id, 7);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(store.calls(), vec![(vec![7], OrderStatus::Processing)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_returns_to_the_processing_queue() {
        let order_queue = Queue::new(16);
        let processing_queue = Queue::new(16);
        processing_queue.push(response(7)).await;

        let store = RecordingStatusStore::new(1);
        let writer = ProcessingWriter::new(
            order_queue.clone(),
            processing_queue.clone(),
            Arc::clone(&store),
            Config::default(),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { writer.run(cancel).await })
        };

        while store.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // The second attempt carries the same response.
        assert_eq!(store.calls(), vec![(vec![7], OrderStatus::Processing)]);
    }
}
