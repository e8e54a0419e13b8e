//! Bounded in-memory FIFO queues shared between pipeline stages.
//!
//! Capacity is fixed at construction. A full queue exerts back-pressure by
//! blocking `push`; items are never dropped silently. Delayed pushes are
//! lightweight timer tasks that abandon their item when the surrounding
//! cancellation token fires.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Multi-producer multi-consumer bounded FIFO.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    // Free-capacity permits: push consumes one, pop returns one.
    capacity: Semaphore,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity: Semaphore::new(capacity),
            }),
        }
    }

    /// Append an item, waiting while the queue is full.
    pub async fn push(&self, item: T) {
        let permit = self
            .inner
            .capacity
            .acquire()
            .await
            .expect("queue capacity semaphore closed");
        // Capacity is restored by pop, not by dropping the permit.
        permit.forget();
        self.lock_items().push_back(item);
    }

    pub async fn push_batch(&self, items: Vec<T>) {
        for item in items {
            self.push(item).await;
        }
    }

    /// Non-blocking take of the oldest item.
    pub fn pop(&self) -> Option<T> {
        let item = self.lock_items().pop_front();
        if item.is_some() {
            self.inner.capacity.add_permits(1);
        }
        item
    }

    /// Non-blocking FIFO drain of up to `count` items. `pop_batch(0)` returns
    /// an empty batch even when the queue is non-empty.
    pub fn pop_batch(&self, count: usize) -> Vec<T> {
        if count == 0 {
            return Vec::new();
        }

        let drained: Vec<T> = {
            let mut items = self.lock_items();
            let take = count.min(items.len());
            items.drain(..take).collect()
        };

        if !drained.is_empty() {
            self.inner.capacity.add_permits(drained.len());
        }

        drained
    }

    /// Approximate current depth.
    pub fn count(&self) -> usize {
        self.lock_items().len()
    }

    /// Schedule a push to happen after `delay`. The scheduled push is
    /// abandoned when `cancel` fires, including while blocked on capacity.
    pub fn push_delayed(&self, item: T, delay: Duration, cancel: &CancellationToken) {
        let queue = self.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = async {
                    tokio::time::sleep(delay).await;
                    queue.push(item).await;
                } => {}
            }
        });
    }

    /// `push_delayed` applied per item. Ordering between the delayed pushes
    /// is not guaranteed.
    pub fn push_batch_delayed(&self, items: Vec<T>, delay: Duration, cancel: &CancellationToken) {
        for item in items {
            self.push_delayed(item, delay, cancel);
        }
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.inner.items.lock().expect("queue mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_pop_preserves_fifo_order() {
        let queue = Queue::new(16);
        for id in [1u64, 2, 3] {
            queue.push(id).await;
        }

        assert_eq!(queue.count(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn pop_batch_drains_in_order() {
        let queue = Queue::new(16);
        queue.push_batch((1u64..=5).collect()).await;

        assert_eq!(queue.pop_batch(3), vec![1, 2, 3]);
        assert_eq!(queue.pop_batch(10), vec![4, 5]);
        assert!(queue.pop_batch(10).is_empty());
    }

    #[tokio::test]
    async fn pop_batch_zero_is_a_noop() {
        let queue = Queue::new(16);
        queue.push(42u64).await;

        assert!(queue.pop_batch(0).is_empty());
        assert_eq!(queue.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_blocks_when_full_until_pop() {
        let queue = Queue::new(1);
        queue.push(1u64).await;

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(2).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(queue.count(), 1, "second push must wait for capacity");

        assert_eq!(queue.pop(), Some(1));
        blocked.await.unwrap();
        assert_eq!(queue.pop(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn push_delayed_lands_after_delay() {
        let queue = Queue::new(16);
        let cancel = CancellationToken::new();

        queue.push_delayed(7u64, Duration::from_secs(10), &cancel);
        tokio::task::yield_now().await;
        assert_eq!(queue.pop(), None);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.pop(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delayed_push_is_abandoned() {
        let queue = Queue::new(16);
        let cancel = CancellationToken::new();

        queue.push_delayed(7u64, Duration::from_secs(10), &cancel);
        cancel.cancel();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.pop(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn push_batch_delayed_delivers_every_item() {
        let queue = Queue::new(16);
        let cancel = CancellationToken::new();

        queue.push_batch_delayed(vec![1u64, 2, 3], Duration::from_secs(5), &cancel);
        tokio::time::sleep(Duration::from_secs(6)).await;

        let mut items = queue.pop_batch(10);
        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 3]);
    }
}
