//! Writer for the terminal INVALID status.

use super::{Config, StatusStore};
use crate::accrual::response::AccrualResponse;
use crate::accrual::wait_for_items;
use crate::models::{OrderId, OrderStatus};
use crate::queue::Queue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub struct InvalidWriter<S> {
    invalid_queue: Queue<AccrualResponse>,
    store: Arc<S>,
    config: Config,
}

impl<S: StatusStore> InvalidWriter<S> {
    pub fn new(invalid_queue: Queue<AccrualResponse>, store: Arc<S>, config: Config) -> Self {
        Self {
            invalid_queue,
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
                    permit.expect("invalid writer semaphore closed")
                }
            };

            if !wait_for_items(&self.invalid_queue, self.config.no_tasks_delay, &cancel).await {
                return Ok(());
            }

            let batch = self.invalid_queue.pop_batch(self.config.batch_size);
            if batch.is_empty() {
                error!("invalid status queue is empty, but should not");
                continue;
            }

            let store = Arc::clone(&self.store);
            let invalid_queue = self.invalid_queue.clone();
            let failed_task_delay = self.config.failed_task_delay;
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;
                write_batch(store, invalid_queue, batch, failed_task_delay, cancel).await;
            });
        }
    }
}

async fn write_batch<S: StatusStore>(
    store: Arc<S>,
    invalid_queue: Queue<AccrualResponse>,
    batch: Vec<AccrualResponse>,
    failed_task_delay: Duration,
    cancel: CancellationToken,
) {
    let ids: Vec<OrderId> = batch.iter().map(|response| response.order_id).collect();

    if let Err(err) = store.update_status(&ids, OrderStatus::Invalid).await {
        warn!(error = %err, "can't update orders");
        invalid_queue.push_batch_delayed(batch, failed_task_delay, &cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::response::AccrualStatus;
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
            status: AccrualStatus::Invalid,
            accrual: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_burst_is_written_in_batches() {
        let invalid_queue = Queue::new(1000);
        for order_id in 0..250u64 {
            invalid_queue.push(response(order_id)).await;
        }

        let store = RecordingStatusStore::new(0);
        let writer = InvalidWriter::new(
            invalid_queue.clone(),
            Arc::clone(&store),
            Config::default(),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { writer.run(cancel).await })
        };

        while store.calls().iter().map(|(ids, _)| ids.len()).sum::<usize>() < 250 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let mut sizes: Vec<usize> = store.calls().iter().map(|(ids, _)| ids.len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![50, 100, 100]);
        assert!(store.calls().iter().all(|(_, status)| *status == OrderStatus::Invalid));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_re_enqueued_and_retried() {
        let invalid_queue = Queue::new(16);
        invalid_queue.push(response(1)).await;
        invalid_queue.push(response(2)).await;

        let store = RecordingStatusStore::new(1);
        let writer = InvalidWriter::new(
            invalid_queue.clone(),
            Arc::clone(&store),
            Config::default(),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { writer.run(cancel).await })
        };

        // The re-enqueued items may come back as one batch or several.
        while store
            .calls()
            .iter()
            .map(|(ids, _)| ids.len())
            .sum::<usize>()
            < 2
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let mut ids: Vec<OrderId> = store
            .calls()
            .iter()
            .flat_map(|(ids, _)| ids.clone())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }
}
