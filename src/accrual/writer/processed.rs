//! Writer for the terminal PROCESSED status.
//!
//! The only stage that credits user balances: each batch becomes a single
//! database transaction applying order accruals, so a crash mid-batch never
//! leaves a half-applied credit.

use super::{AccrualStore, Config};
use crate::accrual::response::AccrualResponse;
use crate::accrual::wait_for_items;
use crate::models::OrderId;
use crate::queue::Queue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub struct ProcessedWriter<S> {
    processed_queue: Queue<AccrualResponse>,
    store: Arc<S>,
    config: Config,
}

impl<S: AccrualStore> ProcessedWriter<S> {
    pub fn new(processed_queue: Queue<AccrualResponse>, store: Arc<S>, config: Config) -> Self {
        Self {
            processed_queue,
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
                    permit.expect("processed writer semaphore closed")
                }
            };

            if !wait_for_items(&self.processed_queue, self.config.no_tasks_delay, &cancel).await {
                return Ok(());
            }

            let batch = self.processed_queue.pop_batch(self.config.batch_size);
            if batch.is_empty() {
                error!("processed status queue is empty, but should not");
                continue;
            }

            let store = Arc::clone(&self.store);
            let processed_queue = self.processed_queue.clone();
            let failed_task_delay = self.config.failed_task_delay;
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;
                write_batch(store, processed_queue, batch, failed_task_delay, cancel).await;
            });
        }
    }
}

async fn write_batch<S: AccrualStore>(
    store: Arc<S>,
    processed_queue: Queue<AccrualResponse>,
    batch: Vec<AccrualResponse>,
    failed_task_delay: Duration,
    cancel: CancellationToken,
) {
    // The router only queues PROCESSED responses that carry a value.
    let accruals: HashMap<OrderId, f64> = batch
        .iter()
        .filter_map(|response| response.accrual.map(|value| (response.order_id, value)))
        .collect();

    if let Err(err) = store.accrue_batch(accruals).await {
        warn!(error = %err, "can't update orders");
        processed_queue.push_batch_delayed(batch, failed_task_delay, &cancel);
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

    struct RecordingAccrualStore {
        calls: Mutex<Vec<HashMap<OrderId, f64>>>,
        failures_left: AtomicUsize,
    }

    impl RecordingAccrualStore {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(failures),
            })
        }

        fn calls(&self) -> Vec<HashMap<OrderId, f64>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccrualStore for RecordingAccrualStore {
        async fn accrue_batch(&self, accruals: HashMap<OrderId, f64>) -> Result<(), StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }

            self.calls.lock().unwrap().push(accruals);
            Ok(())
        }
    }

    fn response(order_id: OrderId, accrual: f64) -> AccrualResponse {
        AccrualResponse {
            order_id,
            status: AccrualStatus::Processed,
            accrual: Some(accrual),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_becomes_an_order_to_value_map() {
        let processed_queue = Queue::new(16);
        processed_queue.push(response(1, 1.23)).await;
        processed_queue.push(response(2, 7.29)).await;

        let store = RecordingAccrualStore::new(0);
        let writer = ProcessedWriter::new(
            processed_queue.clone(),
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

        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], HashMap::from([(1, 1.23), (2, 7.29)]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_re_enqueued_whole() {
        let processed_queue = Queue::new(16);
        processed_queue.push(response(1, 1.23)).await;
        processed_queue.push(response(2, 7.29)).await;

        let store = RecordingAccrualStore::new(1);
        let writer = ProcessedWriter::new(
            processed_queue.clone(),
            Arc::clone(&store),
            Config::default(),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { writer.run(cancel).await })
        };

        // The re-enqueued items may come back as one batch or several.
        while store.calls().iter().map(HashMap::len).sum::<usize>() < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let merged: HashMap<OrderId, f64> = store
            .calls()
            .into_iter()
            .flat_map(|accruals| accruals.into_iter())
            .collect();
        assert_eq!(merged, HashMap::from([(1, 1.23), (2, 7.29)]));
    }
}
