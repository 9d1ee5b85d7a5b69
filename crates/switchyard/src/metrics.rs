//! Metrics for the pool and queue cores.
//!
//! [`Metrics`] is an ordinary owned value. The process creates one, wraps
//! it in an `Arc`, and hands clones to the pool, the queue and whatever
//! request-handling state wants to read it. Nothing here is global.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Connection pool counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Successful borrows
    pub acquired: AtomicU64,

    /// Borrows that gave up waiting for a free slot
    pub timeouts: AtomicU64,

    /// Slots opened (eagerly or on demand)
    pub slots_created: AtomicU64,

    /// Slots thrown away because they were marked unusable
    pub slots_discarded: AtomicU64,

    /// Failed attempts to open a new connection
    pub connect_failures: AtomicU64,

    /// Retries caused by a failed visibility check
    pub visibility_retries: AtomicU64,

    /// Slots currently borrowed
    pub in_use: AtomicI64,
}

impl PoolMetrics {
    pub fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slot_created(&self) {
        self.slots_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slot_discarded(&self) {
        self.slots_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_visibility_retry(&self) {
        self.visibility_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            slots_created: self.slots_created.load(Ordering::Relaxed),
            slots_discarded: self.slots_discarded.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            visibility_retries: self.visibility_retries.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}

/// Task queue counters
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Tasks accepted on the fast path
    pub enqueued: AtomicU64,

    /// Tasks handed to the overflow sink
    pub offloaded: AtomicU64,

    /// Overflow deliveries that the sink reported as failed
    pub offload_failures: AtomicU64,

    /// Pushes refused because the queue was stopped
    pub rejected: AtomicU64,

    /// Tasks delivered to the batch handler
    pub tasks_processed: AtomicU64,

    /// Batches delivered to the batch handler
    pub batches: AtomicU64,

    /// Batches whose handler returned an error or panicked
    pub handler_failures: AtomicU64,

    /// Buffered tasks dropped when the channel closed
    pub dropped_on_close: AtomicU64,
}

impl QueueMetrics {
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offloaded(&self) {
        self.offloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offload_failure(&self) {
        self.offload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch handed to the handler
    pub fn record_batch(&self, size: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.tasks_processed
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_on_close(&self, count: usize) {
        self.dropped_on_close
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Average tasks per batch
    pub fn average_batch_size(&self) -> f64 {
        let batches = self.batches.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.tasks_processed.load(Ordering::Relaxed) as f64 / batches as f64
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            offloaded: self.offloaded.load(Ordering::Relaxed),
            offload_failures: self.offload_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dropped_on_close: self.dropped_on_close.load(Ordering::Relaxed),
            average_batch_size: self.average_batch_size(),
        }
    }
}

/// Registry owned by the process and shared by reference
#[derive(Debug, Default)]
pub struct Metrics {
    pub pool: PoolMetrics,
    pub queue: QueueMetrics,
}

impl Metrics {
    /// Create a new shared registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pool: self.pool.snapshot(),
            queue: self.queue.snapshot(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub acquired: u64,
    pub timeouts: u64,
    pub slots_created: u64,
    pub slots_discarded: u64,
    pub connect_failures: u64,
    pub visibility_retries: u64,
    pub in_use: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueMetricsSnapshot {
    pub enqueued: u64,
    pub offloaded: u64,
    pub offload_failures: u64,
    pub rejected: u64,
    pub tasks_processed: u64,
    pub batches: u64,
    pub handler_failures: u64,
    pub dropped_on_close: u64,
    pub average_batch_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub pool: PoolMetricsSnapshot,
    pub queue: QueueMetricsSnapshot,
}
