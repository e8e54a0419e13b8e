//! Router stage
//!
//! Classifies raw accrual responses by status and hands them to the matching
//! status queue. Orders the external service has not finished valuing loop
//! back to the order queue for another poll. The router never touches the
//! database.

use crate::accrual::response::{AccrualResponse, AccrualStatus};
use crate::accrual::{self, wait_for_items};
use crate::models::OrderId;
use crate::queue::Queue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub struct Router {
    order_queue: Queue<OrderId>,
    router_queue: Queue<AccrualResponse>,
    processing_queue: Queue<AccrualResponse>,
    invalid_queue: Queue<AccrualResponse>,
    processed_queue: Queue<AccrualResponse>,
    concurrency: usize,
    no_tasks_delay: Duration,
    failed_task_delay: Duration,
    no_changes_delay: Duration,
}

impl Router {
    pub fn new(
        order_queue: Queue<OrderId>,
        router_queue: Queue<AccrualResponse>,
        processing_queue: Queue<AccrualResponse>,
        invalid_queue: Queue<AccrualResponse>,
        processed_queue: Queue<AccrualResponse>,
        concurrency: usize,
    ) -> Self {
        Self {
            order_queue,
            router_queue,
            processing_queue,
            invalid_queue,
            processed_queue,
            concurrency,
            no_tasks_delay: accrual::DEFAULT_NO_TASKS_DELAY,
            failed_task_delay: accrual::DEFAULT_FAILED_TASK_DELAY,
            no_changes_delay: accrual::DEFAULT_NO_CHANGES_DELAY,
        }
    }

    /// Stage main loop; returns once `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("router semaphore closed")
                }
            };

            if !wait_for_items(&self.router_queue, self.no_tasks_delay, &cancel).await {
                return Ok(());
            }

            let Some(response) = self.router_queue.pop() else {
                error!("router queue is empty, but should not");
                continue;
            };

            let router = self.route_context();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;
                router.route(response, &cancel).await;
            });
        }
    }

    fn route_context(&self) -> RouteContext {
        RouteContext {
            order_queue: self.order_queue.clone(),
            processing_queue: self.processing_queue.clone(),
            invalid_queue: self.invalid_queue.clone(),
            processed_queue: self.processed_queue.clone(),
            failed_task_delay: self.failed_task_delay,
            no_changes_delay: self.no_changes_delay,
        }
    }
}

struct RouteContext {
    order_queue: Queue<OrderId>,
    processing_queue: Queue<AccrualResponse>,
    invalid_queue: Queue<AccrualResponse>,
    processed_queue: Queue<AccrualResponse>,
    failed_task_delay: Duration,
    no_changes_delay: Duration,
}

impl RouteContext {
    async fn route(&self, response: AccrualResponse, cancel: &CancellationToken) {
        match response.status {
            // Valuation has not started yet; poll again after a long pause.
            AccrualStatus::Registered => {
                self.order_queue
                    .push_delayed(response.order_id, self.no_changes_delay, cancel);
            }
            AccrualStatus::Processing => self.processing_queue.push(response).await,
            AccrualStatus::Invalid => self.invalid_queue.push(response).await,
            AccrualStatus::Processed => {
                if response.accrual.is_some() {
                    self.processed_queue.push(response).await;
                } else {
                    // A terminal response without a value cannot be applied;
                    // treat it as transient and re-poll.
                    self.order_queue
                        .push_delayed(response.order_id, self.failed_task_delay, cancel);
                }
            }
        }
    }
}
