// Shared request-handler state

use std::sync::Arc;

use switchyard::pool::{ConnectionFactory, ConnectionPool, PoolAdmission};
use switchyard::queue::TaskQueue;
use switchyard::{Metrics, RetryPolicy};

/// Everything a request handler can reach. Built once at startup.
pub struct AppState<F: ConnectionFactory> {
    pub pool: Arc<ConnectionPool<F>>,
    pub admission: PoolAdmission<F>,
    pub queue: Arc<TaskQueue>,
    pub metrics: Arc<Metrics>,
    /// Policy for read-after-write visibility retries
    pub read_retry: RetryPolicy,
}

impl<F: ConnectionFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            admission: self.admission.clone(),
            queue: Arc::clone(&self.queue),
            metrics: Arc::clone(&self.metrics),
            read_retry: self.read_retry.clone(),
        }
    }
}
