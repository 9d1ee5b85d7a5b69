//! Task queue lifecycle
//!
//! One [`TaskQueue`] per worker process: a bounded channel, a fixed set
//! of batch consumers, and the admission path in front of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::admission::{Admitted, QueueAdmission};
use super::channel::TaskChannel;
use super::consumer::{BatchHandler, Consumer, IdleBackoff};
use super::sink::{HandlerOffload, OverflowSink};
use super::task::Task;
use crate::metrics::Metrics;
use crate::reliability::duration_millis;

/// Task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Identifier passed to the batch handler
    pub worker_id: usize,

    /// Channel capacity
    pub capacity: usize,

    /// Number of batch consumers
    pub consumer_count: usize,

    /// Most tasks handed to the handler at once
    pub batch_size: usize,

    /// Fast-path wait for channel space
    #[serde(with = "duration_millis")]
    pub push_timeout: Duration,

    /// First idle backoff step
    #[serde(with = "duration_millis")]
    pub idle_backoff_min: Duration,

    /// Idle backoff cap
    #[serde(with = "duration_millis")]
    pub idle_backoff_max: Duration,

    /// How long shutdown waits for consumers to finish
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            capacity: 1024,
            consumer_count: num_cpus::get().max(2),
            batch_size: 10,
            push_timeout: Duration::from_millis(20),
            idle_backoff_min: Duration::from_millis(5),
            idle_backoff_max: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_consumer_count(mut self, count: usize) -> Self {
        self.consumer_count = count.max(1);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    pub fn with_idle_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.idle_backoff_min = min;
        self.idle_backoff_max = max.max(min);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Force at least one consumer, one slot of capacity and one task per
    /// batch, and an idle backoff cap no lower than its first step.
    pub fn normalized(mut self) -> Self {
        self.capacity = self.capacity.max(1);
        self.consumer_count = self.consumer_count.max(1);
        self.batch_size = self.batch_size.max(1);
        self.idle_backoff_max = self.idle_backoff_max.max(self.idle_backoff_min);
        self
    }
}

/// Queue lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Created, consumers not started
    Idle,
    /// Accepting tasks
    Running,
    /// No longer accepting tasks, consumers finishing
    Stopping,
    /// All consumers have exited
    Stopped,
}

/// Task queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue is not running
    #[error("task rejected: queue is not running")]
    TaskRejected,

    #[error("queue consumers already started")]
    AlreadyStarted,

    #[error("queue shutdown timed out with {remaining} consumers still running")]
    ShutdownTimeout { remaining: usize },
}

/// Bounded task queue with batch consumers
///
/// # Example
///
/// ```ignore
/// use switchyard::queue::{handler_fn, QueueConfig, Task, TaskQueue};
///
/// let queue = TaskQueue::new(QueueConfig::default(), metrics);
/// queue.start(handler_fn(|worker, batch: Vec<Task>, consumer| async move {
///     process(batch).await
/// }))?;
///
/// queue.push(Task::new(payload)).await?;
/// queue.shutdown().await?;
/// ```
pub struct TaskQueue {
    config: QueueConfig,
    channel: Arc<TaskChannel>,
    running: Arc<AtomicBool>,
    admission: QueueAdmission,
    status: RwLock<QueueStatus>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig, metrics: Arc<Metrics>) -> Self {
        let config = config.normalized();
        let channel = Arc::new(TaskChannel::new(config.capacity));
        let running = Arc::new(AtomicBool::new(false));
        let admission = QueueAdmission::new(
            Arc::clone(&channel),
            Arc::clone(&running),
            config.push_timeout,
            Arc::clone(&metrics),
        );

        Self {
            config,
            channel,
            running,
            admission,
            status: RwLock::new(QueueStatus::Idle),
            consumers: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn status(&self) -> QueueStatus {
        *self.status.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Tasks currently buffered
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Start the consumers. Overflow tasks go through `handler` as
    /// single-task batches.
    pub fn start<H: BatchHandler>(&self, handler: H) -> Result<(), QueueError> {
        let handler: Arc<dyn BatchHandler> = Arc::new(handler);
        let sink = Arc::new(HandlerOffload::new(self.config.worker_id, Arc::clone(&handler)));
        self.start_inner(handler, sink)
    }

    /// Start the consumers with a dedicated overflow sink
    pub fn start_with_sink<H: BatchHandler>(
        &self,
        handler: H,
        sink: Arc<dyn OverflowSink>,
    ) -> Result<(), QueueError> {
        self.start_inner(Arc::new(handler), sink)
    }

    #[instrument(skip_all, fields(worker_id = self.config.worker_id))]
    fn start_inner(
        &self,
        handler: Arc<dyn BatchHandler>,
        sink: Arc<dyn OverflowSink>,
    ) -> Result<(), QueueError> {
        {
            let mut status = self.status.write();
            if *status != QueueStatus::Idle {
                return Err(QueueError::AlreadyStarted);
            }
            *status = QueueStatus::Running;
        }

        self.admission.set_sink(sink);

        let idle = IdleBackoff {
            base: self.config.idle_backoff_min,
            cap: self.config.idle_backoff_max,
        };
        self.running.store(true, Ordering::Release);

        let mut consumers = self.consumers.lock();
        for index in 0..self.config.consumer_count {
            let consumer = Consumer::new(
                self.config.worker_id,
                index,
                self.config.batch_size,
                idle,
                Arc::clone(&self.channel),
                Arc::clone(&self.running),
                Arc::clone(&handler),
                Arc::clone(&self.metrics),
            );
            consumers.push(tokio::spawn(consumer.run()));
        }

        info!(
            worker_id = self.config.worker_id,
            consumers = self.config.consumer_count,
            capacity = self.config.capacity,
            batch_size = self.config.batch_size,
            "Task queue started"
        );
        Ok(())
    }

    /// Admit a task, see [`QueueAdmission::push`]
    pub async fn push(&self, task: Task) -> Result<Admitted, QueueError> {
        self.admission.push(task).await
    }

    /// Stop accepting tasks and close the channel.
    ///
    /// Buffered tasks are dropped and their count returned. Batches already
    /// handed to the handler run to completion.
    pub fn stop(&self) -> usize {
        self.running.store(false, Ordering::Release);
        {
            let mut status = self.status.write();
            if matches!(*status, QueueStatus::Idle | QueueStatus::Running) {
                *status = QueueStatus::Stopping;
            }
        }

        let dropped = self.channel.close().len();
        if dropped > 0 {
            self.metrics.queue.record_dropped_on_close(dropped);
            warn!(
                worker_id = self.config.worker_id,
                dropped,
                "Dropped buffered tasks on stop"
            );
        }
        dropped
    }

    /// Stop and wait up to `shutdown_timeout` for every consumer to exit
    #[instrument(skip(self), fields(worker_id = self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.stop();

        let mut handles: Vec<_> = self.consumers.lock().drain(..).collect();
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;

        while let Some(handle) = handles.pop() {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Consumer task failed"),
                Err(_) => {
                    let remaining = handles.len() + 1;
                    warn!(remaining, "Timed out waiting for consumers");
                    return Err(QueueError::ShutdownTimeout { remaining });
                }
            }
        }

        *self.status.write() = QueueStatus::Stopped;
        info!(worker_id = self.config.worker_id, "Task queue stopped");
        Ok(())
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::consumer::handler_fn;
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;

    fn noop() -> impl BatchHandler {
        handler_fn(|_, _batch: Vec<Task>, _| async { anyhow::Ok(()) })
    }

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.push_timeout, Duration::from_millis(20));
        assert!(config.consumer_count >= 2);
    }

    #[test]
    fn test_config_serde_uses_millis() {
        let config = QueueConfig::default().with_push_timeout(Duration::from_millis(35));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["push_timeout"], 35);

        let parsed: QueueConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[tokio::test]
    async fn test_push_before_start_is_rejected() {
        let queue = TaskQueue::new(QueueConfig::default(), Metrics::new());
        assert_eq!(queue.status(), QueueStatus::Idle);

        let result = queue.push(Task::new(Map::new())).await;
        assert!(matches!(result, Err(QueueError::TaskRejected)));
    }

    #[tokio::test]
    async fn test_literal_config_still_drains() {
        let config = QueueConfig {
            consumer_count: 0,
            batch_size: 0,
            capacity: 0,
            ..QueueConfig::default()
        };
        let queue = TaskQueue::new(config, Metrics::new());
        assert_eq!(queue.config().consumer_count, 1);

        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        queue
            .start(handler_fn(move |_, batch: Vec<Task>, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(batch.len(), Ordering::SeqCst);
                    anyhow::Ok(())
                }
            }))
            .unwrap();

        let admitted = queue.push(Task::new(Map::new())).await.unwrap();
        assert_eq!(admitted, Admitted::Enqueued);

        tokio::time::timeout(Duration::from_secs(5), async {
            while handled.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let queue = TaskQueue::new(QueueConfig::default().with_consumer_count(1), Metrics::new());
        queue.start(noop()).unwrap();
        assert!(matches!(queue.start(noop()), Err(QueueError::AlreadyStarted)));
        assert_eq!(queue.status(), QueueStatus::Running);

        queue.shutdown().await.unwrap();
        assert_eq!(queue.status(), QueueStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_on_stuck_handler() {
        let config = QueueConfig::default()
            .with_consumer_count(1)
            .with_shutdown_timeout(Duration::from_millis(100));
        let queue = TaskQueue::new(config, Metrics::new());
        queue
            .start(handler_fn(|_, _batch: Vec<Task>, _| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::Ok(())
            }))
            .unwrap();

        queue.push(Task::new(Map::new())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = queue.shutdown().await.unwrap_err();
        assert!(matches!(err, QueueError::ShutdownTimeout { remaining: 1 }));
    }
}
