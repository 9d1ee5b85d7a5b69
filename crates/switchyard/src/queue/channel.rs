//! Bounded FIFO task channel
//!
//! Multi-producer, multi-consumer. Pops never wait; pushes wait for space
//! at most a caller-supplied timeout. Closing the channel drops whatever
//! is still buffered and makes every later pop report `Closed`.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use super::task::Task;

/// Outcome of a zero-wait pop
#[derive(Debug)]
pub enum Pop {
    Item(Task),
    Empty,
    Closed,
}

/// A push that did not land; the task is handed back to the caller
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("task channel is full")]
    Full(Task),

    #[error("task channel is closed")]
    Closed(Task),
}

impl PushError {
    pub fn into_task(self) -> Task {
        match self {
            Self::Full(task) | Self::Closed(task) => task,
        }
    }
}

#[derive(Debug, Default)]
struct Buffer {
    tasks: VecDeque<Task>,
    closed: bool,
}

/// Bounded task buffer shared by producers and consumers
#[derive(Debug)]
pub struct TaskChannel {
    buffer: Mutex<Buffer>,
    capacity: usize,
    space: Notify,
    closed_tx: watch::Sender<bool>,
}

impl TaskChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (closed_tx, _) = watch::channel(false);
        Self {
            buffer: Mutex::new(Buffer {
                tasks: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            space: Notify::new(),
            closed_tx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.lock().closed
    }

    /// Push without waiting
    pub fn try_push(&self, task: Task) -> Result<(), PushError> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(PushError::Closed(task));
        }
        if buffer.tasks.len() >= self.capacity {
            return Err(PushError::Full(task));
        }
        buffer.tasks.push_back(task);
        Ok(())
    }

    /// Push, waiting up to `timeout` for a consumer to free space
    pub async fn push_timeout(&self, task: Task, timeout: Duration) -> Result<(), PushError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut task = task;

        loop {
            // Register interest before checking so a pop between the check
            // and the wait is not missed.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(task) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(returned)) => task = returned,
                Err(closed) => return Err(closed),
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(PushError::Full(task));
            }
        }
    }

    /// Pop the oldest task without waiting
    pub fn try_pop(&self) -> Pop {
        let popped = {
            let mut buffer = self.buffer.lock();
            if buffer.closed {
                return Pop::Closed;
            }
            buffer.tasks.pop_front()
        };

        match popped {
            Some(task) => {
                self.space.notify_waiters();
                Pop::Item(task)
            }
            None => Pop::Empty,
        }
    }

    /// Close the channel and return the tasks that were still buffered.
    ///
    /// Returns an empty list if the channel was already closed.
    pub fn close(&self) -> Vec<Task> {
        let dropped = {
            let mut buffer = self.buffer.lock();
            if buffer.closed {
                return Vec::new();
            }
            buffer.closed = true;
            buffer.tasks.drain(..).collect()
        };

        self.closed_tx.send_replace(true);
        self.space.notify_waiters();
        dropped
    }

    /// Resolves once the channel is closed
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives as long as `self`, so this only ends on close
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn task(n: u64) -> Task {
        let mut payload = Map::new();
        payload.insert("n".into(), json!(n));
        Task::new(payload)
    }

    fn n(pop: Pop) -> u64 {
        match pop {
            Pop::Item(task) => task.get("n").and_then(|v| v.as_u64()).unwrap(),
            other => panic!("expected item, got {other:?}"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let channel = TaskChannel::new(4);
        for i in 0..3 {
            channel.try_push(task(i)).unwrap();
        }
        assert_eq!(n(channel.try_pop()), 0);
        assert_eq!(n(channel.try_pop()), 1);
        assert_eq!(n(channel.try_pop()), 2);
        assert!(matches!(channel.try_pop(), Pop::Empty));
    }

    #[test]
    fn test_try_push_full_returns_task() {
        let channel = TaskChannel::new(1);
        channel.try_push(task(1)).unwrap();

        let err = channel.try_push(task(2)).unwrap_err();
        assert!(matches!(err, PushError::Full(_)));
        assert_eq!(err.into_task().get("n"), Some(&json!(2)));
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_timeout_expires_on_full_channel() {
        let channel = TaskChannel::new(1);
        channel.try_push(task(1)).unwrap();

        let started = tokio::time::Instant::now();
        let err = channel
            .push_timeout(task(2), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Full(_)));
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_timeout_succeeds_when_space_frees() {
        let channel = std::sync::Arc::new(TaskChannel::new(1));
        channel.try_push(task(1)).unwrap();

        let consumer = std::sync::Arc::clone(&channel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            consumer.try_pop();
        });

        channel
            .push_timeout(task(2), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(n(channel.try_pop()), 2);
    }

    #[test]
    fn test_close_drops_buffer_and_reports_closed() {
        let channel = TaskChannel::new(4);
        channel.try_push(task(1)).unwrap();
        channel.try_push(task(2)).unwrap();

        let dropped = channel.close();
        assert_eq!(dropped.len(), 2);
        assert!(channel.is_closed());
        assert!(matches!(channel.try_pop(), Pop::Closed));
        assert!(matches!(channel.try_push(task(3)), Err(PushError::Closed(_))));
        assert!(channel.close().is_empty());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let channel = std::sync::Arc::new(TaskChannel::new(1));
        let waiter = {
            let channel = std::sync::Arc::clone(&channel);
            tokio::spawn(async move { channel.closed().await })
        };

        channel.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
