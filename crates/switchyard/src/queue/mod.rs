//! Bounded task queue with batch consumers and overflow offloading
//!
//! This module provides:
//! - [`TaskQueue`] - Lifecycle: start, push, stop, shutdown
//! - [`QueueAdmission`] - Fast-path push with overflow offloading
//! - [`TaskChannel`] - Bounded FIFO buffer with zero-wait pops
//! - [`BatchHandler`] / [`OverflowSink`] - Extension points

mod admission;
mod channel;
mod consumer;
#[allow(clippy::module_inception)]
mod queue;
mod sink;
mod task;

pub use admission::{Admitted, QueueAdmission};
pub use channel::{Pop, PushError, TaskChannel};
pub use consumer::{handler_fn, BatchHandler, ConsumerState, HandlerFn};
pub use queue::{QueueConfig, QueueError, QueueStatus, TaskQueue};
pub use sink::{DropOffload, HandlerOffload, OffloadError, OverflowSink, OFFLOAD_CONSUMER_INDEX};
pub use task::{Task, TaskError};
