//! In-memory connection backend
//!
//! Used by tests and by the server when no `DATABASE_URL` is configured.
//! All connections opened by one factory share the same record table.
//!
//! With snapshot reads enabled, each connection only sees rows that were
//! committed before it was opened plus its own writes, which reproduces
//! the stale-read behavior the visibility retry loop exists for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::connection::{Connection, ConnectionError, ConnectionFactory, RecordStore};

#[derive(Debug)]
struct Row {
    value: Value,
    version: u64,
    written_by: u64,
}

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<String, Row>,
    version: u64,
}

#[derive(Debug, Default)]
struct Shared {
    table: RwLock<Table>,
    snapshot_reads: AtomicBool,
    connect_delay_ms: AtomicU64,
    fail_next_connects: AtomicU32,
    fail_next_pings: AtomicU32,
    next_connection_id: AtomicU64,
    total_connects: AtomicU64,
    open: AtomicUsize,
    peak_open: AtomicUsize,
}

/// Take one unit from a countdown if it is positive
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Factory for [`InMemoryConnection`]s
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnectionFactory {
    shared: Arc<Shared>,
}

impl InMemoryConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections only see rows committed before they were opened
    pub fn with_snapshot_reads(self) -> Self {
        self.shared.snapshot_reads.store(true, Ordering::Release);
        self
    }

    /// Delay every connect by `delay`
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.shared
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
        self
    }

    /// Make the next `n` connects fail
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.fail_next_connects.store(n, Ordering::Release);
    }

    /// Make the next `n` pings fail, on whichever connections run them
    pub fn fail_next_pings(&self, n: u32) {
        self.shared.fail_next_pings.store(n, Ordering::Release);
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Most connections ever open at once
    pub fn peak_connections(&self) -> usize {
        self.shared.peak_open.load(Ordering::Acquire)
    }

    /// Successful connects so far
    pub fn total_connects(&self) -> u64 {
        self.shared.total_connects.load(Ordering::Acquire)
    }

    pub fn record_count(&self) -> usize {
        self.shared.table.read().rows.len()
    }
}

#[async_trait]
impl ConnectionFactory for InMemoryConnectionFactory {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<InMemoryConnection, ConnectionError> {
        let delay = self.shared.connect_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if take_one(&self.shared.fail_next_connects) {
            return Err(ConnectionError::Connect("injected connect failure".into()));
        }

        let id = self.shared.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = self.shared.table.read().version;

        self.shared.total_connects.fetch_add(1, Ordering::AcqRel);
        let open = self.shared.open.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.peak_open.fetch_max(open, Ordering::AcqRel);

        Ok(InMemoryConnection {
            id,
            snapshot,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// One session against the shared in-memory table
#[derive(Debug)]
pub struct InMemoryConnection {
    id: u64,
    snapshot: u64,
    shared: Arc<Shared>,
}

impl InMemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn can_see(&self, row: &Row) -> bool {
        !self.shared.snapshot_reads.load(Ordering::Acquire)
            || row.version <= self.snapshot
            || row.written_by == self.id
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn ping(&mut self) -> Result<(), ConnectionError> {
        if take_one(&self.shared.fail_next_pings) {
            return Err(ConnectionError::Broken(format!(
                "connection {} stopped responding",
                self.id
            )));
        }
        Ok(())
    }

    async fn close(self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryConnection {
    async fn put_record(&mut self, key: &str, value: &Value) -> Result<(), ConnectionError> {
        let mut table = self.shared.table.write();
        table.version += 1;
        let version = table.version;
        table.rows.insert(
            key.to_string(),
            Row {
                value: value.clone(),
                version,
                written_by: self.id,
            },
        );
        Ok(())
    }

    async fn get_record(&mut self, key: &str) -> Result<Option<Value>, ConnectionError> {
        let table = self.shared.table.read();
        Ok(table
            .rows
            .get(key)
            .filter(|row| self.can_see(row))
            .map(|row| row.value.clone()))
    }
}
