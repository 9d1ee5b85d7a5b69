//! Overflow sinks
//!
//! When the channel stays full past the push timeout, the task is handed
//! to an [`OverflowSink`] on a detached task. Delivery through a sink is
//! best effort and carries no ordering relative to the channel.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::consumer::BatchHandler;
use super::task::Task;

/// Consumer index reported to the handler for offloaded tasks
pub const OFFLOAD_CONSUMER_INDEX: usize = usize::MAX;

/// Errors reported by an overflow sink
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    /// The sink refused the task outright
    #[error("overflow task rejected: {0}")]
    Rejected(String),

    /// The sink accepted the task but processing failed
    #[error("overflow task failed: {0}")]
    Failed(String),
}

/// Destination for tasks that did not fit in the channel
#[async_trait]
pub trait OverflowSink: Send + Sync + 'static {
    async fn offload(&self, task: Task) -> Result<(), OffloadError>;
}

/// Runs the overflow task through the batch handler as a batch of one
pub struct HandlerOffload {
    worker_id: usize,
    handler: Arc<dyn BatchHandler>,
}

impl HandlerOffload {
    pub fn new(worker_id: usize, handler: Arc<dyn BatchHandler>) -> Self {
        Self { worker_id, handler }
    }
}

#[async_trait]
impl OverflowSink for HandlerOffload {
    async fn offload(&self, task: Task) -> Result<(), OffloadError> {
        self.handler
            .handle(self.worker_id, vec![task], OFFLOAD_CONSUMER_INDEX)
            .await
            .map_err(|e| OffloadError::Failed(format!("{e:#}")))
    }
}

/// Logs and discards overflow tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct DropOffload;

#[async_trait]
impl OverflowSink for DropOffload {
    async fn offload(&self, task: Task) -> Result<(), OffloadError> {
        warn!(task_id = %task.id(), "Dropping overflow task");
        Err(OffloadError::Rejected("overflow tasks are discarded".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::consumer::handler_fn;
    use serde_json::Map;

    #[tokio::test]
    async fn test_handler_offload_uses_sentinel_index() {
        let handler = handler_fn(|worker_id, batch: Vec<Task>, consumer| async move {
            assert_eq!(worker_id, 4);
            assert_eq!(batch.len(), 1);
            assert_eq!(consumer, OFFLOAD_CONSUMER_INDEX);
            anyhow::Ok(())
        });
        let sink = HandlerOffload::new(4, Arc::new(handler));

        sink.offload(Task::new(Map::new())).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_offload_surfaces_handler_error() {
        let handler = handler_fn(|_, _batch: Vec<Task>, _| async move {
            Err::<(), _>(anyhow::anyhow!("downstream unavailable"))
        });
        let sink = HandlerOffload::new(0, Arc::new(handler));

        let err = sink.offload(Task::new(Map::new())).await.unwrap_err();
        assert!(matches!(err, OffloadError::Failed(msg) if msg == "downstream unavailable"));
    }

    #[tokio::test]
    async fn test_drop_offload_rejects() {
        let err = DropOffload.offload(Task::new(Map::new())).await.unwrap_err();
        assert!(matches!(err, OffloadError::Rejected(_)));
    }
}
