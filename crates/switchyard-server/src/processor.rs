// Batch handler for queued tasks
//
// Tasks shaped like {"key": "...", "value": ...} are written to the record
// store through one pooled connection per batch. Anything else is logged.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use switchyard::pool::{ConnectionError, ConnectionFactory, PoolAdmission, RecordStore};
use switchyard::queue::{BatchHandler, Task, OFFLOAD_CONSUMER_INDEX};

pub struct RecordWriter<F: ConnectionFactory> {
    admission: PoolAdmission<F>,
}

impl<F: ConnectionFactory> RecordWriter<F> {
    pub fn new(admission: PoolAdmission<F>) -> Self {
        Self { admission }
    }
}

fn record_of(task: &Task) -> Option<(String, Value)> {
    let key = task.get("key")?.as_str()?;
    let value = task.get("value")?;
    Some((key.to_string(), value.clone()))
}

#[async_trait]
impl<F> BatchHandler for RecordWriter<F>
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    async fn handle(
        &self,
        worker_id: usize,
        batch: Vec<Task>,
        consumer_index: usize,
    ) -> anyhow::Result<()> {
        let writes: Vec<_> = batch.iter().filter_map(record_of).collect();
        debug!(
            worker_id,
            consumer = consumer_index,
            offloaded = consumer_index == OFFLOAD_CONSUMER_INDEX,
            size = batch.len(),
            writes = writes.len(),
            "Handling task batch"
        );

        for task in batch.iter().filter(|task| record_of(task).is_none()) {
            debug!(task_id = %task.id(), "Task carries no record, nothing to write");
        }

        if writes.is_empty() {
            return Ok(());
        }

        let mut conn = self
            .admission
            .admit()
            .await
            .context("No connection available for task batch")?;

        for (key, value) in &writes {
            if let Err(e) = conn.put_record(key, value).await {
                if matches!(e, ConnectionError::Broken(_)) {
                    warn!(slot = conn.slot_id(), "Dropping broken connection after failed write");
                    conn.mark_unusable();
                }
                return Err(e).with_context(|| format!("Failed to write record {key}"));
            }
        }

        Ok(())
    }
}
