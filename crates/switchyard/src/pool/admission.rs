//! Pool admission with retry
//!
//! Wraps [`ConnectionPool::acquire`] in a [`RetryPolicy`]: exhaustion and
//! connect failures are retried with backoff, and when the pool is
//! configured with `test_on_acquire` a slot that fails its ping is
//! discarded and another one is tried.

use std::sync::Arc;

use tracing::{debug, warn};

use super::connection::{Connection, ConnectionFactory};
use super::pool::{ConnectionPool, PoolError, PooledConnection};
use crate::reliability::{RetryPolicy, RetryTrigger};

/// Retrying front door to a [`ConnectionPool`]
pub struct PoolAdmission<F: ConnectionFactory> {
    pool: Arc<ConnectionPool<F>>,
    policy: RetryPolicy,
}

impl<F: ConnectionFactory> Clone for PoolAdmission<F> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            policy: self.policy.clone(),
        }
    }
}

impl<F: ConnectionFactory> PoolAdmission<F> {
    pub fn new(pool: Arc<ConnectionPool<F>>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<F>> {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Borrow a healthy slot, retrying per the policy.
    ///
    /// Returns the last pool error once attempts run out, or
    /// [`PoolError::RetryExhausted`] if every attempt drew a slot that
    /// failed its health check. [`PoolError::Closed`] is never retried.
    pub async fn admit(&self) -> Result<PooledConnection<F::Connection>, PoolError> {
        let timeout = self.pool.config().acquire_timeout;
        let mut ctx = self.policy.context();

        loop {
            let (trigger, failure) = match self.pool.acquire(timeout).await {
                Ok(mut conn) => {
                    if !self.pool.config().test_on_acquire {
                        return Ok(conn);
                    }
                    match conn.ping().await {
                        Ok(()) => return Ok(conn),
                        Err(e) => {
                            warn!(
                                slot = conn.slot_id(),
                                error = %e,
                                "Pooled connection failed health check"
                            );
                            conn.mark_unusable();
                            (RetryTrigger::Stale, None)
                        }
                    }
                }
                Err(e @ PoolError::Exhausted { .. }) => (RetryTrigger::Exhausted, Some(e)),
                Err(e @ PoolError::Connect(_)) => (RetryTrigger::Transient, Some(e)),
                Err(e) => return Err(e),
            };

            match ctx.record(trigger) {
                Some(delay) => {
                    debug!(
                        attempt = ctx.attempt(),
                        trigger = %trigger,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying pool admission"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(attempts = ctx.attempt(), trigger = %trigger, "Pool admission gave up");
                    return Err(failure.unwrap_or(PoolError::RetryExhausted {
                        attempts: ctx.attempt(),
                    }));
                }
            }
        }
    }
}
