//! Batch consumers
//!
//! Each consumer is a small state machine running on its own task:
//!
//! ```text
//!   Draining ──batch──▶ Processing ──▶ Draining
//!      │  ▲
//!   empty│  │backoff elapsed
//!      ▼  │
//!    Backoff            Draining ──closed──▶ Stopped
//! ```
//!
//! Draining pops up to `batch_size` tasks without waiting. An empty drain
//! backs off exponentially, and the first non-empty drain resets the
//! backoff.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, trace};

use super::channel::{Pop, TaskChannel};
use super::task::Task;
use crate::metrics::Metrics;
use crate::reliability::backoff_delay;

/// Processes one batch of tasks.
///
/// `consumer_index` identifies the consumer that drained the batch, or is
/// [`OFFLOAD_CONSUMER_INDEX`](super::OFFLOAD_CONSUMER_INDEX) when the
/// batch came through the overflow path.
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        worker_id: usize,
        batch: Vec<Task>,
        consumer_index: usize,
    ) -> anyhow::Result<()>;
}

/// A [`BatchHandler`] backed by an async closure, see [`handler_fn`]
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`BatchHandler`]
///
/// # Example
///
/// ```
/// use switchyard::queue::{handler_fn, Task};
///
/// let handler = handler_fn(|worker_id, batch: Vec<Task>, consumer| async move {
///     tracing::info!(worker_id, consumer, size = batch.len(), "Got batch");
///     anyhow::Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(usize, Vec<Task>, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> BatchHandler for HandlerFn<F>
where
    F: Fn(usize, Vec<Task>, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        worker_id: usize,
        batch: Vec<Task>,
        consumer_index: usize,
    ) -> anyhow::Result<()> {
        (self.f)(worker_id, batch, consumer_index).await
    }
}

/// Consumer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Draining,
    Processing,
    Backoff,
    Stopped,
}

/// Idle backoff bounds for consumers
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdleBackoff {
    pub base: Duration,
    pub cap: Duration,
}

pub(crate) struct Consumer {
    worker_id: usize,
    index: usize,
    batch_size: usize,
    idle: IdleBackoff,
    idle_attempt: u32,
    state: ConsumerState,
    channel: Arc<TaskChannel>,
    running: Arc<AtomicBool>,
    handler: Arc<dyn BatchHandler>,
    metrics: Arc<Metrics>,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        worker_id: usize,
        index: usize,
        batch_size: usize,
        idle: IdleBackoff,
        channel: Arc<TaskChannel>,
        running: Arc<AtomicBool>,
        handler: Arc<dyn BatchHandler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            worker_id,
            index,
            batch_size: batch_size.max(1),
            idle,
            idle_attempt: 0,
            state: ConsumerState::Draining,
            channel,
            running,
            handler,
            metrics,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(worker_id = self.worker_id, consumer = self.index, "Consumer started");
        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            self.state = match self.state {
                ConsumerState::Draining => self.drain(&mut batch),
                ConsumerState::Processing => self.process(std::mem::take(&mut batch)).await,
                ConsumerState::Backoff => self.backoff().await,
                ConsumerState::Stopped => break,
            };
        }

        debug!(worker_id = self.worker_id, consumer = self.index, "Consumer stopped");
    }

    fn drain(&mut self, batch: &mut Vec<Task>) -> ConsumerState {
        while batch.len() < self.batch_size {
            match self.channel.try_pop() {
                Pop::Item(task) => batch.push(task),
                Pop::Empty => break,
                // Tasks popped before the close are still ours to run
                Pop::Closed if batch.is_empty() => return ConsumerState::Stopped,
                Pop::Closed => break,
            }
        }

        if !batch.is_empty() {
            self.idle_attempt = 0;
            ConsumerState::Processing
        } else if self.running.load(Ordering::Acquire) {
            ConsumerState::Backoff
        } else {
            ConsumerState::Stopped
        }
    }

    async fn process(&mut self, batch: Vec<Task>) -> ConsumerState {
        let size = batch.len();
        self.metrics.queue.record_batch(size);
        trace!(consumer = self.index, size, "Processing batch");

        let outcome = AssertUnwindSafe(self.handler.handle(self.worker_id, batch, self.index))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.queue.record_handler_failure();
                error!(
                    worker_id = self.worker_id,
                    consumer = self.index,
                    batch_size = size,
                    error = %e,
                    "Batch handler failed"
                );
            }
            Err(panic) => {
                self.metrics.queue.record_handler_failure();
                error!(
                    worker_id = self.worker_id,
                    consumer = self.index,
                    batch_size = size,
                    panic = panic_message(panic.as_ref()),
                    "Batch handler panicked"
                );
            }
        }

        ConsumerState::Draining
    }

    async fn backoff(&mut self) -> ConsumerState {
        let delay = backoff_delay(self.idle_attempt, self.idle.base, self.idle.cap);
        self.idle_attempt = self.idle_attempt.saturating_add(1);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.channel.closed() => {}
        }

        ConsumerState::Draining
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
