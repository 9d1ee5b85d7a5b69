//! # Switchyard
//!
//! Admission cores for a high-concurrency request-serving process.
//!
//! ## Features
//!
//! - **Bounded connection pool**: Exclusive scoped borrows that always return their slot
//! - **Read-after-write retries**: Re-run a read on fresh slots until the result is visible
//! - **One backoff law**: `min(base * 2^attempt, cap)` for pool retries and idle consumers
//! - **Bounded task queue**: Batch-draining consumers with zero-wait pops
//! - **Overflow offloading**: Producers never block longer than the push timeout
//!
//! ## Architecture
//!
//! ```text
//!   request handlers                        request handlers
//!         │                                        │
//!         ▼                                        ▼
//! ┌───────────────────┐                  ┌───────────────────┐
//! │  PoolAdmission    │                  │  QueueAdmission   │
//! │  (retry, health)  │                  │  (push / offload) │──▶ OverflowSink
//! └───────────────────┘                  └───────────────────┘
//!         │                                        │
//!         ▼                                        ▼
//! ┌───────────────────┐                  ┌───────────────────┐
//! │  ConnectionPool   │                  │   TaskChannel     │
//! │  (semaphore+idle) │                  │  (bounded FIFO)   │
//! └───────────────────┘                  └───────────────────┘
//!         │                                        │
//!         ▼                                        ▼
//!  ConnectionFactory                       N batch consumers ──▶ BatchHandler
//!  (Postgres / memory)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use switchyard::prelude::*;
//!
//! let metrics = Metrics::new();
//! let pool = ConnectionPool::connect(
//!     InMemoryConnectionFactory::new(),
//!     PoolConfig::default(),
//!     metrics.clone(),
//! )
//! .await?;
//!
//! let queue = TaskQueue::new(QueueConfig::default(), metrics);
//! queue.start(handler_fn(|worker_id, batch: Vec<Task>, consumer| async move {
//!     tracing::info!(worker_id, consumer, size = batch.len(), "batch");
//!     anyhow::Ok(())
//! }))?;
//! ```

pub mod metrics;
pub mod pool;
pub mod queue;
pub mod reliability;

/// Prelude for common imports
pub mod prelude {
    pub use crate::metrics::{Metrics, MetricsSnapshot};
    pub use crate::pool::{
        Connection, ConnectionError, ConnectionFactory, ConnectionPool, InMemoryConnectionFactory,
        PgConnectionFactory, PoolAdmission, PoolConfig, PoolError, PooledConnection, RecordStore,
    };
    pub use crate::queue::{
        handler_fn, Admitted, BatchHandler, OverflowSink, QueueConfig, QueueError, Task, TaskQueue,
    };
    pub use crate::reliability::{backoff_delay, RetryPolicy};
}

// Re-export key types at crate root
pub use metrics::{Metrics, MetricsSnapshot};
pub use pool::{
    ConnectionPool, PoolAdmission, PoolConfig, PoolError, PoolStatus, PooledConnection,
};
pub use queue::{Admitted, QueueConfig, QueueError, QueueStatus, Task, TaskQueue};
pub use reliability::{backoff_delay, RetryContext, RetryPolicy, RetryTrigger};
