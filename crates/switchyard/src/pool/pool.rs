//! Bounded pool of exclusive connections
//!
//! Capacity is a semaphore with `max_size` permits. Every borrow holds one
//! permit for its whole lifetime, and a new slot is opened only when a
//! permit holder finds the idle list empty, so the number of live slots
//! never exceeds `max_size`.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use super::connection::{Connection, ConnectionError, ConnectionFactory};
use super::slot::{Slot, SlotId};
use crate::metrics::Metrics;
use crate::reliability::{duration_millis, RetryPolicy, RetryTrigger};

/// Connection pool configuration
///
/// # Example
///
/// ```
/// use switchyard::pool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::default()
///     .with_min_size(2)
///     .with_max_size(8)
///     .with_acquire_timeout(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Slots opened eagerly by [`ConnectionPool::connect`]
    pub min_size: usize,

    /// Hard upper bound on live slots
    pub max_size: usize,

    /// How long a borrower waits for a free slot
    #[serde(with = "duration_millis")]
    pub acquire_timeout: Duration,

    /// Ping borrowed slots before handing them out (see `PoolAdmission`)
    #[serde(default)]
    pub test_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(3),
            test_on_acquire: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the eager slot count (clamped to `max_size`)
    pub fn with_min_size(mut self, min: usize) -> Self {
        self.min_size = min;
        self.normalized()
    }

    /// Set the slot limit (at least one)
    pub fn with_max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self.normalized()
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_test_on_acquire(mut self, enabled: bool) -> Self {
        self.test_on_acquire = enabled;
        self
    }

    /// Force `max_size >= 1` and `min_size <= max_size`.
    ///
    /// Applied by [`ConnectionPool::new`], so configs built from struct
    /// literals or deserialized from files get the same bounds.
    pub fn normalized(mut self) -> Self {
        self.max_size = self.max_size.max(1);
        self.min_size = self.min_size.min(self.max_size);
        self
    }
}

/// Connection pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No slot became free within the acquire timeout
    #[error("connection pool exhausted: no slot freed within {waited:?}")]
    Exhausted { waited: Duration },

    /// The visibility-sensitive retry loop used every attempt
    #[error("result still not visible after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// Opening a new connection failed
    #[error("connection error: {0}")]
    Connect(#[from] ConnectionError),

    /// The pool has been closed
    #[error("connection pool is closed")]
    Closed,
}

impl PoolError {
    /// Whether retrying later might succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub min_size: usize,
    pub max_size: usize,
    /// Slots that exist right now, idle or borrowed
    pub live: usize,
    pub idle: usize,
    /// Permits held by borrowers (including borrowers still connecting)
    pub in_use: usize,
    pub closed: bool,
}

/// State shared between the pool and its outstanding borrows
struct PoolShared<C> {
    idle: Mutex<VecDeque<Slot<C>>>,
    permits: Arc<Semaphore>,
    live: AtomicUsize,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
}

impl<C: Connection> PoolShared<C> {
    fn return_slot(&self, slot: Slot<C>) {
        self.idle.lock().push_back(slot);
    }

    fn discard(&self, slot: Slot<C>, reason: &'static str) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.metrics.pool.record_slot_discarded();
        debug!(slot = slot.id(), uses = slot.uses(), reason, "Discarding pooled connection");
        drop(slot.into_connection());
    }
}

/// An exclusive borrow of one pooled connection.
///
/// Dropping the borrow releases the slot exactly once, whether the
/// borrower finished normally, returned an error, panicked, or had its
/// future cancelled. A borrow marked unusable is discarded instead of
/// being returned, and the pool opens a replacement lazily.
pub struct PooledConnection<C: Connection> {
    slot: Option<Slot<C>>,
    unusable: bool,
    shared: Arc<PoolShared<C>>,
    // Released after `drop` has put the slot back, so the next waiter
    // always finds it on the idle list.
    _permit: OwnedSemaphorePermit,
}

impl<C: Connection> PooledConnection<C> {
    fn new(slot: Slot<C>, permit: OwnedSemaphorePermit, shared: Arc<PoolShared<C>>) -> Self {
        Self {
            slot: Some(slot),
            unusable: false,
            shared,
            _permit: permit,
        }
    }

    fn slot(&self) -> &Slot<C> {
        match &self.slot {
            Some(slot) => slot,
            None => unreachable!("pooled connection used after release"),
        }
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot().id()
    }

    /// Number of borrows of this slot, including this one
    pub fn uses(&self) -> u64 {
        self.slot().uses()
    }

    /// Never hand this slot to another caller again
    pub fn mark_unusable(&mut self) {
        self.unusable = true;
    }

    pub fn is_unusable(&self) -> bool {
        self.unusable
    }

    /// Give the slot back now instead of at end of scope
    pub fn release(self) {
        drop(self);
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.slot().conn()
    }
}

impl<C: Connection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        match &mut self.slot {
            Some(slot) => slot.conn_mut(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        self.shared.metrics.pool.record_released();

        if self.unusable {
            self.shared.discard(slot, "marked unusable");
        } else if self.shared.closed.load(Ordering::Acquire) {
            self.shared.discard(slot, "pool closed");
        } else {
            self.shared.return_slot(slot);
        }
    }
}

impl<C: Connection> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("slot", &self.slot)
            .field("unusable", &self.unusable)
            .finish()
    }
}

/// Bounded pool of exclusive connections.
///
/// # Example
///
/// ```ignore
/// use switchyard::pool::{ConnectionPool, PoolConfig, PgConnectionFactory};
///
/// let factory = PgConnectionFactory::new("postgres://localhost/app");
/// let pool = ConnectionPool::connect(factory, PoolConfig::default(), metrics).await?;
///
/// let value = pool
///     .with_connection(|conn| {
///         Box::pin(async move { conn.get_record("a").await.map_err(PoolError::from) })
///     })
///     .await?;
/// ```
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    shared: Arc<PoolShared<F::Connection>>,
    next_slot_id: AtomicU64,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create an empty pool. Slots are opened on demand.
    pub fn new(factory: F, config: PoolConfig, metrics: Arc<Metrics>) -> Self {
        let config = config.normalized();
        let shared = Arc::new(PoolShared {
            idle: Mutex::new(VecDeque::with_capacity(config.max_size)),
            permits: Arc::new(Semaphore::new(config.max_size)),
            live: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            metrics,
        });

        Self {
            factory,
            config,
            shared,
            next_slot_id: AtomicU64::new(0),
        }
    }

    /// Create a pool and eagerly open `min_size` slots
    #[instrument(skip_all, fields(min = config.min_size, max = config.max_size))]
    pub async fn connect(
        factory: F,
        config: PoolConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, PoolError> {
        let pool = Self::new(factory, config, metrics);

        for _ in 0..pool.config.min_size {
            let slot = pool.open_slot().await?;
            pool.shared.return_slot(slot);
        }

        info!(
            min_size = pool.config.min_size,
            max_size = pool.config.max_size,
            "Connection pool ready"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    /// Borrow a slot, waiting up to `timeout` for one to be released.
    ///
    /// Reuses an idle slot when one exists, otherwise opens a new one if
    /// the pool is below `max_size`. `timeout` bounds the whole call,
    /// including the connect for a new slot.
    #[instrument(skip(self), fields(max = self.config.max_size))]
    pub async fn acquire(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection<F::Connection>, PoolError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let permits = Arc::clone(&self.shared.permits);
        let permit = match tokio::time::timeout_at(deadline, permits.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => return Err(self.exhausted(timeout, "Connection pool exhausted")),
        };

        let idle = self.shared.idle.lock().pop_front();
        let mut slot = match idle {
            Some(slot) => slot,
            // A cancelled connect has not counted itself as live yet
            None => match tokio::time::timeout_at(deadline, self.open_slot()).await {
                Ok(slot) => slot?,
                Err(_) => return Err(self.exhausted(timeout, "Timed out opening connection")),
            },
        };
        slot.touch();

        self.shared.metrics.pool.record_acquired();
        debug!(slot = slot.id(), uses = slot.uses(), "Borrowed pooled connection");
        Ok(PooledConnection::new(slot, permit, Arc::clone(&self.shared)))
    }

    /// Return a borrowed slot to the pool.
    ///
    /// Equivalent to dropping the borrow; a slot marked unusable is
    /// discarded rather than returned.
    pub fn release(&self, conn: PooledConnection<F::Connection>) {
        conn.release();
    }

    /// Run `op` on a borrowed connection and release it on every exit path.
    ///
    /// The error type only needs to absorb [`PoolError`], so callers keep
    /// their own error enums.
    pub async fn with_connection<R, E, Op>(&self, op: Op) -> Result<R, E>
    where
        Op: for<'c> FnOnce(&'c mut F::Connection) -> BoxFuture<'c, Result<R, E>>,
        E: From<PoolError>,
    {
        let mut conn = self.acquire(self.config.acquire_timeout).await?;
        op(&mut *conn).await
    }

    /// Run `op` until `is_visible` accepts its result, moving to a
    /// different slot after every rejected attempt.
    ///
    /// Used after writes whose effects may not yet be observable through
    /// every pooled session. A rejected slot is released as unusable, so
    /// the next attempt can never land on it. Errors from `op` itself are
    /// returned immediately and the slot is released healthy.
    #[instrument(skip_all, fields(max_attempts = policy.max_attempts))]
    pub async fn force_retry_connection<R, E, Op, V>(
        &self,
        policy: &RetryPolicy,
        mut op: Op,
        is_visible: V,
    ) -> Result<R, E>
    where
        Op: for<'c> FnMut(&'c mut F::Connection) -> BoxFuture<'c, Result<R, E>>,
        V: Fn(&R) -> bool,
        E: From<PoolError>,
    {
        let mut ctx = policy.context();

        loop {
            let mut conn = self.acquire(self.config.acquire_timeout).await?;
            let slot_id = conn.slot_id();

            let value = op(&mut *conn).await?;
            if is_visible(&value) {
                if ctx.attempt() > 0 {
                    debug!(slot = slot_id, retries = ctx.attempt(), "Result became visible");
                }
                return Ok(value);
            }

            conn.mark_unusable();
            drop(conn);
            self.shared.metrics.pool.record_visibility_retry();

            match ctx.record(RetryTrigger::Stale) {
                Some(delay) => {
                    debug!(
                        slot = slot_id,
                        attempt = ctx.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Result not visible on this connection, retrying on another slot"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(attempts = ctx.attempt(), "Result never became visible");
                    return Err(PoolError::RetryExhausted {
                        attempts: ctx.attempt(),
                    }
                    .into());
                }
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let available = self.shared.permits.available_permits();
        PoolStatus {
            min_size: self.config.min_size,
            max_size: self.config.max_size,
            live: self.shared.live.load(Ordering::Acquire),
            idle: self.shared.idle.lock().len(),
            in_use: self.config.max_size.saturating_sub(available),
            closed: self.shared.closed.load(Ordering::Acquire),
        }
    }

    /// Close the pool.
    ///
    /// Waiting and future borrowers fail with [`PoolError::Closed`]. Idle
    /// slots are closed now; borrowed ones are discarded when released.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.permits.close();

        let idle: Vec<_> = self.shared.idle.lock().drain(..).collect();
        let count = idle.len();

        for slot in idle {
            self.shared.live.fetch_sub(1, Ordering::AcqRel);
            let slot_id = slot.id();
            if let Err(e) = slot.into_connection().close().await {
                warn!(slot = slot_id, error = %e, "Error closing pooled connection");
            }
        }

        info!(closed = count, "Connection pool closed");
    }

    fn exhausted(&self, waited: Duration, reason: &'static str) -> PoolError {
        self.shared.metrics.pool.record_timeout();
        warn!(
            waited_ms = waited.as_millis() as u64,
            live = self.shared.live.load(Ordering::Acquire),
            "{reason}"
        );
        PoolError::Exhausted { waited }
    }

    async fn open_slot(&self) -> Result<Slot<F::Connection>, PoolError> {
        let conn = self.factory.connect().await.map_err(|e| {
            self.shared.metrics.pool.record_connect_failure();
            warn!(error = %e, "Failed to open pooled connection");
            PoolError::Connect(e)
        })?;

        let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.live.fetch_add(1, Ordering::AcqRel);
        self.shared.metrics.pool.record_slot_created();
        debug!(slot = id, "Opened pooled connection");

        Ok(Slot::new(id, conn))
    }
}
