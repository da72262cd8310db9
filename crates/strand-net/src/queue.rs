//! Bounded queues with byte accounting.
//!
//! Producers block on a byte budget rather than an item count, so one
//! large message cannot be outrun by thousands of small ones. An item is
//! always admitted into an empty queue, otherwise an item larger than the
//! whole budget could never be enqueued.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Fixed bookkeeping cost charged per enqueued item, on top of its
/// payload bytes.
pub const ITEM_OVERHEAD: usize = 64;

/// Extra bytes charged when an item carries a sync notifier.
pub const NOTIFIER_SURCHARGE: usize = 8;

/// The queue was closed while pushing or popping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// A bounded multi-producer queue accounted in bytes.
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: std::sync::Mutex<State<T>>,
    readable: Notify,
    writable: Notify,
}

struct State<T> {
    items: VecDeque<(T, usize)>,
    bytes: usize,
    max_bytes: Option<usize>,
    closed: bool,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue with the given byte budget; `None` is unbounded.
    #[must_use]
    pub fn new(max_bytes: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: std::sync::Mutex::new(State {
                    items: VecDeque::new(),
                    bytes: 0,
                    max_bytes,
                    closed: false,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue `item` accounted at `size` bytes, waiting for room.
    ///
    /// # Errors
    ///
    /// Fails with [`QueueClosed`] when the queue is or becomes closed
    /// while waiting.
    pub async fn push(&self, item: T, size: usize) -> Result<(), QueueClosed> {
        loop {
            let notified = self.inner.writable.notified();
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                if state.has_room(size) {
                    state.items.push_back((item, size));
                    state.bytes += size;
                    drop(state);
                    self.inner.readable.notify_waiters();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Enqueue without waiting: `Ok(true)` on success, `Ok(false)` when
    /// the budget is exhausted.
    ///
    /// # Errors
    ///
    /// Fails with [`QueueClosed`] when the queue is closed.
    pub fn try_push(&self, item: T, size: usize) -> Result<bool, QueueClosed> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueClosed);
        }
        if !state.has_room(size) {
            return Ok(false);
        }
        state.items.push_back((item, size));
        state.bytes += size;
        drop(state);
        self.inner.readable.notify_waiters();
        Ok(true)
    }

    /// Dequeue the oldest item, waiting for one.
    ///
    /// A closed queue keeps draining its remaining items before failing.
    ///
    /// # Errors
    ///
    /// Fails with [`QueueClosed`] once the queue is closed and empty.
    pub async fn pop(&self) -> Result<T, QueueClosed> {
        loop {
            let notified = self.inner.readable.notified();
            {
                let mut state = self.lock();
                if let Some((item, size)) = state.items.pop_front() {
                    state.bytes -= size;
                    drop(state);
                    self.inner.writable.notify_waiters();
                    return Ok(item);
                }
                if state.closed {
                    return Err(QueueClosed);
                }
            }
            notified.await;
        }
    }

    /// Dequeue without waiting: `Ok(Some(_))` when an item is ready,
    /// `Ok(None)` when the queue is empty but open.
    ///
    /// # Errors
    ///
    /// Fails with [`QueueClosed`] once the queue is closed and empty.
    pub fn try_pop(&self) -> Result<Option<T>, QueueClosed> {
        let mut state = self.lock();
        if let Some((item, size)) = state.items.pop_front() {
            state.bytes -= size;
            drop(state);
            self.inner.writable.notify_waiters();
            return Ok(Some(item));
        }
        if state.closed {
            return Err(QueueClosed);
        }
        Ok(None)
    }

    /// Close gracefully: pushes fail immediately, pops drain the
    /// remaining items first. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
        }
        self.inner.readable.notify_waiters();
        self.inner.writable.notify_waiters();
    }

    /// Close and discard: returns every queued item so the caller can
    /// complete their notifiers.
    pub fn wipe(&self) -> Vec<T> {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            state.bytes = 0;
            state.items.drain(..).map(|(item, _)| item).collect()
        };
        self.inner.readable.notify_waiters();
        self.inner.writable.notify_waiters();
        drained
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl<T> State<T> {
    fn has_room(&self, size: usize) -> bool {
        match self.max_bytes {
            None => true,
            // an empty queue always admits one item
            Some(max) => self.items.is_empty() || self.bytes + size <= max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedQueue::new(None);
        queue.push(1, 10).await.unwrap();
        queue.push(2, 10).await.unwrap();
        queue.push(3, 10).await.unwrap();

        assert_eq!(queue.pop().await, Ok(1));
        assert_eq!(queue.pop().await, Ok(2));
        assert_eq!(queue.pop().await, Ok(3));
    }

    #[tokio::test]
    async fn test_byte_budget_blocks_producer() {
        let queue = BoundedQueue::new(Some(100));
        queue.push("a", 60).await.unwrap();
        assert!(!queue.try_push("b", 60).unwrap());

        // pop frees the budget
        queue.pop().await.unwrap();
        assert!(queue.try_push("b", 60).unwrap());
    }

    #[tokio::test]
    async fn test_oversized_item_enters_empty_queue() {
        let queue = BoundedQueue::new(Some(10));
        queue.push("huge", 1000).await.unwrap();
        assert_eq!(queue.pop().await, Ok("huge"));
    }

    #[tokio::test]
    async fn test_blocked_push_resumes_after_pop() {
        let queue = BoundedQueue::new(Some(100));
        queue.push(1u32, 80).await.unwrap();

        let q = queue.clone();
        let producer = tokio::spawn(async move { q.push(2u32, 80).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await, Ok(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.pop().await, Ok(2));
    }

    #[tokio::test]
    async fn test_close_drains_then_fails() {
        let queue = BoundedQueue::new(None);
        queue.push(1, 1).await.unwrap();
        queue.close();

        assert_eq!(queue.push(2, 1).await, Err(QueueClosed));
        assert_eq!(queue.pop().await, Ok(1));
        assert_eq!(queue.pop().await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(None);
        let q = queue.clone();
        let consumer = tokio::spawn(async move { q.pop().await });

        tokio::task::yield_now().await;
        queue.close();
        assert_eq!(consumer.await.unwrap(), Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_wipe_returns_pending_items() {
        let queue = BoundedQueue::new(None);
        queue.push(1, 1).await.unwrap();
        queue.push(2, 1).await.unwrap();

        assert_eq!(queue.wipe(), vec![1, 2]);
        assert_eq!(queue.pop().await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_try_pop_distinguishes_empty_and_closed() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(None);
        assert_eq!(queue.try_pop(), Ok(None));

        queue.close();
        assert_eq!(queue.try_pop(), Err(QueueClosed));
    }
}
