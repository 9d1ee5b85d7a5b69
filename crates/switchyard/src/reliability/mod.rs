//! Reliability patterns shared by the pool and queue cores
//!
//! This module provides:
//! - [`backoff_delay`] - The single exponential backoff law
//! - [`RetryPolicy`] - Configurable retry limits and intervals
//! - [`RetryContext`] - Per-operation attempt tracking

mod retry;

pub(crate) use retry::duration_millis;
pub use retry::{backoff_delay, RetryContext, RetryPolicy, RetryTrigger};
