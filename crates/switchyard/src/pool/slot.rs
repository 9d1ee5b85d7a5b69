//! Slot - one borrowable unit of the pool.

use std::time::{Duration, Instant};

/// Monotonically increasing slot identifier. Never reused within a pool.
pub type SlotId = u64;

/// A pooled connection plus the bookkeeping the pool keeps about it.
pub struct Slot<C> {
    id: SlotId,
    conn: C,
    created_at: Instant,
    uses: u64,
}

impl<C> Slot<C> {
    pub(crate) fn new(id: SlotId, conn: C) -> Self {
        Self {
            id,
            conn,
            created_at: Instant::now(),
            uses: 0,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Number of times this slot has been borrowed
    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub(crate) fn touch(&mut self) {
        self.uses += 1;
    }

    pub(crate) fn into_connection(self) -> C {
        self.conn
    }
}

impl<C> std::fmt::Debug for Slot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("uses", &self.uses)
            .field("age", &self.age())
            .finish()
    }
}
