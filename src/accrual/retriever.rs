//! Retriever stage
//!
//! Pops queued order ids and drives parallel accrual lookups, bounded by a
//! counting semaphore. A 429 from the external service parks the whole stage
//! behind a global wait-for deadline; transient failures re-enqueue the order
//! with a delay so it is retried later.

use crate::accrual::client::{AccrualClient, ClientError};
use crate::accrual::response::AccrualResponse;
use crate::accrual::{self, wait_for_items};
use crate::models::OrderId;
use crate::queue::Queue;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Seam between the stage and the HTTP client, so the stage is testable
/// without a live accrual service.
#[async_trait]
pub trait AccrualSource: Send + Sync + 'static {
    async fn get_accrual(&self, order_id: OrderId) -> Result<AccrualResponse, ClientError>;
}

#[async_trait]
impl AccrualSource for AccrualClient {
    async fn get_accrual(&self, order_id: OrderId) -> Result<AccrualResponse, ClientError> {
        AccrualClient::get_accrual(self, order_id).await
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub no_tasks_delay: Duration,
    pub failed_task_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: accrual::DEFAULT_CONCURRENCY,
            no_tasks_delay: accrual::DEFAULT_NO_TASKS_DELAY,
            failed_task_delay: accrual::DEFAULT_FAILED_TASK_DELAY,
        }
    }
}

/// Global rate-limit deadline shared by all retriever workers.
///
/// Stored as milliseconds since a stage-local epoch, offset by one so that
/// zero means "unset". Writers only ever move the deadline forward; the
/// worker that observes an expired deadline clears it with a CAS, so readers
/// see either nothing or a still-future instant.
struct WaitUntil {
    epoch: Instant,
    encoded: AtomicU64,
}

impl WaitUntil {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            encoded: AtomicU64::new(0),
        }
    }

    fn get(&self) -> Option<Instant> {
        match self.encoded.load(Ordering::Acquire) {
            0 => None,
            encoded => Some(self.epoch + Duration::from_millis(encoded - 1)),
        }
    }

    /// Extend the deadline, never moving it earlier. Deadlines already in the
    /// past are ignored.
    fn extend_to(&self, deadline: Instant) {
        if deadline <= Instant::now() {
            return;
        }
        let target = self.encode(deadline);

        let mut current = self.encoded.load(Ordering::Acquire);
        while current < target {
            match self.encoded.compare_exchange(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Clear the deadline, but only if it is still the observed one.
    fn clear(&self, observed: Instant) -> bool {
        self.encoded
            .compare_exchange(self.encode(observed), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn encode(&self, deadline: Instant) -> u64 {
        deadline.saturating_duration_since(self.epoch).as_millis() as u64 + 1
    }
}

pub struct Retriever<C> {
    client: Arc<C>,
    order_queue: Queue<OrderId>,
    router_queue: Queue<AccrualResponse>,
    wait_until: Arc<WaitUntil>,
    config: Config,
}

impl<C: AccrualSource> Retriever<C> {
    pub fn new(
        client: Arc<C>,
        order_queue: Queue<OrderId>,
        router_queue: Queue<AccrualResponse>,
        config: Config,
    ) -> Self {
        Self {
            client,
            order_queue,
            router_queue,
            wait_until: Arc::new(WaitUntil::new()),
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
                    permit.expect("retriever semaphore closed")
                }
            };

            if !self.wait_if_need(&cancel).await {
                return Ok(());
            }

            let Some(order_id) = self.order_queue.pop() else {
                // Lost the race for the last queued item; permit released on drop.
                error!("order queue is empty, but should not");
                continue;
            };

            let client = Arc::clone(&self.client);
            let order_queue = self.order_queue.clone();
            let router_queue = self.router_queue.clone();
            let wait_until = Arc::clone(&self.wait_until);
            let failed_task_delay = self.config.failed_task_delay;
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;

                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = client.get_accrual(order_id) => match result {
                        Ok(response) => router_queue.push(response).await,
                        Err(ClientError::TooManyRequests { retry_at }) => {
                            wait_until.extend_to(retry_at);
                            order_queue.push(order_id).await;
                            warn!(order_id, "accrual service rate limit hit, order re-queued");
                        }
                        Err(err) => {
                            order_queue.push_delayed(order_id, failed_task_delay, &cancel);
                            warn!(order_id, error = %err, "can't retrieve accrual");
                        }
                    }
                }
            });
        }
    }

    /// Wait for queued work, then sleep out the global rate-limit deadline
    /// if one is set. Returns `false` when cancelled.
    async fn wait_if_need(&self, cancel: &CancellationToken) -> bool {
        if !wait_for_items(&self.order_queue, self.config.no_tasks_delay, cancel).await {
            return false;
        }

        loop {
            let Some(deadline) = self.wait_until.get() else {
                return true;
            };

            if deadline > Instant::now() {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }

            if self.wait_until.clear(deadline) {
                return true;
            }
        }
    }
}
