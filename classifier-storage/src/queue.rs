//! A dequeue-or-wait queue with a timeout, the async equivalent of the
//! mutex-plus-condition-variable queues the feature-extraction,
//! cache-update and classification queues use.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

pub struct TimedQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for TimedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimedQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Enqueue `item` and wake one waiting dequeuer.
    pub async fn enqueue(&self, item: T) {
        self.items.lock().await.push_back(item);
        self.notify.notify_one();
    }

    /// Pop the front item if one is immediately available, else wait
    /// up to `timeout` for one to arrive. Returns `None` on timeout.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.items.lock().await.pop_front() {
            return Some(item);
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        if tokio::time::timeout(timeout, notified.as_mut()).await.is_err() {
            return None;
        }
        self.items.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeue_returns_immediately_when_item_present() {
        let queue = TimedQueue::new();
        queue.enqueue(42).await;
        let got = queue.dequeue_timeout(Duration::from_millis(50)).await;
        assert_eq!(got, Some(42));
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let queue: TimedQueue<i32> = TimedQueue::new();
        let got = queue.dequeue_timeout(Duration::from_millis(20)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn enqueue_wakes_a_waiting_dequeue() {
        let queue = std::sync::Arc::new(TimedQueue::new());
        let q2 = queue.clone();
        let handle = tokio::spawn(async move { q2.dequeue_timeout(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue("hello").await;
        assert_eq!(handle.await.unwrap(), Some("hello"));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = TimedQueue::new();
        queue.enqueue(1).await;
        queue.enqueue(2).await;
        queue.enqueue(3).await;
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)).await, Some(1));
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)).await, Some(2));
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)).await, Some(3));
    }
}
