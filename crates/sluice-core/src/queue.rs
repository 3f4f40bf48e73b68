//! Bounded work queue between the producer and the worker pool.
//!
//! The queue couples producer pacing to consumer throughput: `put` waits while
//! the queue holds `capacity` items, and `try_take` waits while it is empty.
//! Emptiness alone is never terminal. Consumers only see the end of the stream
//! once the producer has called [`BoundedQueue::mark_complete`] and every
//! queued item has been taken.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

/// Contract violations on the queue. Both indicate a broken producer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("put called after the queue was marked complete")]
    Completed,
    #[error("queue was already marked complete")]
    AlreadyCompleted,
}

struct State<W> {
    items: VecDeque<W>,
    complete: bool,
}

struct Shared<W> {
    state: Mutex<State<W>>,
    not_full: Notify,
    not_empty: Notify,
    capacity: usize,
    blocked_puts: AtomicUsize,
}

/// Fixed-capacity FIFO with an explicit completion signal.
///
/// Cloning yields another handle to the same queue.
pub struct BoundedQueue<W> {
    shared: Arc<Shared<W>>,
}

impl<W> Clone for BoundedQueue<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<W> std::fmt::Debug for BoundedQueue<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.shared.capacity)
            .field("blocked_puts", &self.blocked_puts())
            .finish()
    }
}

impl<W> BoundedQueue<W> {
    /// Create a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    complete: false,
                }),
                not_full: Notify::new(),
                not_empty: Notify::new(),
                capacity,
                blocked_puts: AtomicUsize::new(0),
            }),
        }
    }

    /// Enqueue `item`, waiting for space if the queue is full.
    ///
    /// Returns [`QueueError::Completed`] if completion was already marked; the
    /// item is dropped in that case.
    pub async fn put(&self, item: W) -> Result<(), QueueError> {
        let mut item = Some(item);
        let mut waited = false;
        loop {
            let notified = self.shared.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock().await;
                if state.complete {
                    return Err(QueueError::Completed);
                }
                if state.items.len() < self.shared.capacity {
                    if let Some(item) = item.take() {
                        state.items.push_back(item);
                    }
                    drop(state);
                    self.shared.not_empty.notify_one();
                    return Ok(());
                }
            }
            if !waited {
                waited = true;
                self.shared.blocked_puts.fetch_add(1, Ordering::Relaxed);
            }
            notified.await;
        }
    }

    /// Signal that no further items will be enqueued.
    ///
    /// Wakes every waiting consumer so each can observe the terminal state once
    /// the backlog is drained.
    pub async fn mark_complete(&self) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock().await;
        if state.complete {
            return Err(QueueError::AlreadyCompleted);
        }
        state.complete = true;
        drop(state);
        self.shared.not_empty.notify_waiters();
        // A producer blocked in `put` from another handle must see the flag.
        self.shared.not_full.notify_waiters();
        Ok(())
    }

    /// Take the next item, waiting while the queue is empty but still open.
    ///
    /// Returns `None` only when the queue is marked complete and empty. The
    /// terminal observation is not consumed: every later call returns `None`
    /// as well.
    pub async fn try_take(&self) -> Option<W> {
        loop {
            let notified = self.shared.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    let more = !state.items.is_empty();
                    drop(state);
                    self.shared.not_full.notify_one();
                    if more {
                        // Pass the baton so a burst of puts is not served by one consumer only.
                        self.shared.not_empty.notify_one();
                    }
                    return Some(item);
                }
                if state.complete {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of items currently queued.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the producer has marked completion.
    pub async fn is_complete(&self) -> bool {
        self.shared.state.lock().await.complete
    }

    /// Number of `put` calls that had to wait for free space.
    pub fn blocked_puts(&self) -> usize {
        self.shared.blocked_puts.load(Ordering::Relaxed)
    }
}
