//! Queue admission
//!
//! Fast path: wait briefly for channel space. Slow path: hand the task to
//! the overflow sink on a detached task and return immediately, so a
//! producer is never blocked longer than the push timeout.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::channel::{PushError, TaskChannel};
use super::consumer::panic_message;
use super::queue::QueueError;
use super::sink::{DropOffload, OverflowSink};
use super::task::Task;
use crate::metrics::Metrics;

/// Where an admitted task went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admitted {
    /// Buffered in the channel for the batch consumers
    Enqueued,
    /// Handed to the overflow sink
    Offloaded,
}

/// Producer-facing side of a task queue
pub struct QueueAdmission {
    channel: Arc<TaskChannel>,
    running: Arc<AtomicBool>,
    push_timeout: Duration,
    sink: OnceLock<Arc<dyn OverflowSink>>,
    metrics: Arc<Metrics>,
}

impl QueueAdmission {
    pub(crate) fn new(
        channel: Arc<TaskChannel>,
        running: Arc<AtomicBool>,
        push_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            channel,
            running,
            push_timeout,
            sink: OnceLock::new(),
            metrics,
        }
    }

    /// Install the overflow sink. Only the first call has any effect.
    pub(crate) fn set_sink(&self, sink: Arc<dyn OverflowSink>) -> bool {
        self.sink.set(sink).is_ok()
    }

    pub fn push_timeout(&self) -> Duration {
        self.push_timeout
    }

    /// Admit one task.
    ///
    /// Rejected only when the queue is not running. A full channel is not
    /// an error: the task is offloaded and `Admitted::Offloaded` returned.
    pub async fn push(&self, task: Task) -> Result<Admitted, QueueError> {
        if !self.running.load(Ordering::Acquire) {
            self.metrics.queue.record_rejected();
            return Err(QueueError::TaskRejected);
        }

        match self.channel.push_timeout(task, self.push_timeout).await {
            Ok(()) => {
                self.metrics.queue.record_enqueued();
                Ok(Admitted::Enqueued)
            }
            Err(PushError::Full(task)) => {
                self.offload(task);
                Ok(Admitted::Offloaded)
            }
            Err(PushError::Closed(task)) => {
                self.metrics.queue.record_rejected();
                debug!(task_id = %task.id(), "Queue closed while pushing");
                Err(QueueError::TaskRejected)
            }
        }
    }

    fn offload(&self, task: Task) {
        let task_id = task.id();
        let sink = match self.sink.get() {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(DropOffload),
        };
        let metrics = Arc::clone(&self.metrics);

        metrics.queue.record_offloaded();
        debug!(
            %task_id,
            timeout_ms = self.push_timeout.as_millis() as u64,
            "Queue full, offloading task"
        );

        tokio::spawn(async move {
            match AssertUnwindSafe(sink.offload(task)).catch_unwind().await {
                Ok(Ok(())) => trace!(%task_id, "Overflow task delivered"),
                Ok(Err(e)) => {
                    metrics.queue.record_offload_failure();
                    warn!(%task_id, error = %e, "Overflow sink failed");
                }
                Err(panic) => {
                    metrics.queue.record_offload_failure();
                    warn!(
                        %task_id,
                        panic = panic_message(panic.as_ref()),
                        "Overflow sink panicked"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::sink::OffloadError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Map;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Task>>);

    #[async_trait]
    impl OverflowSink for Collect {
        async fn offload(&self, task: Task) -> Result<(), OffloadError> {
            self.0.lock().push(task);
            Ok(())
        }
    }

    fn admission(
        capacity: usize,
        running: bool,
    ) -> (QueueAdmission, Arc<TaskChannel>, Arc<Metrics>) {
        let channel = Arc::new(TaskChannel::new(capacity));
        let metrics = Metrics::new();
        let admission = QueueAdmission::new(
            Arc::clone(&channel),
            Arc::new(AtomicBool::new(running)),
            Duration::from_millis(20),
            Arc::clone(&metrics),
        );
        (admission, channel, metrics)
    }

    #[tokio::test]
    async fn test_rejects_when_not_running() {
        let (admission, channel, metrics) = admission(4, false);

        let result = admission.push(Task::new(Map::new())).await;
        assert!(matches!(result, Err(QueueError::TaskRejected)));
        assert!(channel.is_empty());
        assert_eq!(metrics.queue.snapshot().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_channel_offloads_to_sink() {
        let (admission, channel, metrics) = admission(1, true);
        let sink = Arc::new(Collect::default());
        assert!(admission.set_sink(sink.clone()));

        assert_eq!(admission.push(Task::new(Map::new())).await.unwrap(), Admitted::Enqueued);
        let overflow = Task::new(Map::new());
        let overflow_id = overflow.id();
        assert_eq!(admission.push(overflow).await.unwrap(), Admitted::Offloaded);

        tokio::time::sleep(Duration::from_millis(1)).await;
        let offloaded = sink.0.lock();
        assert_eq!(offloaded.len(), 1);
        assert_eq!(offloaded[0].id(), overflow_id);
        assert_eq!(channel.len(), 1);
        assert_eq!(metrics.queue.snapshot().offloaded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sink_counts_failure() {
        let (admission, _channel, metrics) = admission(1, true);
        admission.push(Task::new(Map::new())).await.unwrap();
        admission.push(Task::new(Map::new())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(metrics.queue.snapshot().offload_failures, 1);
    }
}
