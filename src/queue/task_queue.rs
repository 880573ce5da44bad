use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// Async FIFO queue shared between job drivers (producers) and the worker
/// pool (consumers).
///
/// Dispatch is strictly first-in first-out, so small jobs queue behind large
/// ones but are never denied scheduling; fairness beyond ordering comes from
/// the bounded worker concurrency, not the queue. Expiry of stale tasks is a
/// property of the task itself, checked by workers at dequeue time.
pub struct TaskQueue<T> {
    state: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, task: T) {
        let mut state = self.state.lock().await;
        state.push_back(task);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Removes and returns the oldest task, waiting until one is available.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(task) = self.try_pop().await {
                return task;
            }
            let notified = self.notify.notified();
            // Re-check after registering the waiter so a push racing with
            // registration cannot be missed.
            if let Some(task) = self.try_pop().await {
                return task;
            }
            notified.await;
        }
    }

    pub async fn try_pop(&self) -> Option<T> {
        self.state.lock().await.pop_front()
    }

    /// Drains every queued task, returning them so callers can account for
    /// work that will never run.
    pub async fn clear(&self) -> Vec<T> {
        let mut state = self.state.lock().await;
        let drained = state.drain(..).collect();
        drop(state);
        self.notify.notify_waiters();
        drained
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
