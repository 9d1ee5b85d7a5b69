//! Connection pooling
//!
//! This module provides:
//! - [`ConnectionPool`] - Bounded pool of exclusive connections
//! - [`PooledConnection`] - Scoped borrow that always returns its slot
//! - [`PoolAdmission`] - Acquire with retry and optional health checks
//! - [`InMemoryConnectionFactory`] / [`PgConnectionFactory`] - Backends

mod admission;
mod connection;
mod memory;
#[allow(clippy::module_inception)]
mod pool;
mod postgres;
mod slot;

pub use admission::PoolAdmission;
pub use connection::{Connection, ConnectionError, ConnectionFactory, RecordStore};
pub use memory::{InMemoryConnection, InMemoryConnectionFactory};
pub use pool::{ConnectionPool, PoolConfig, PoolError, PoolStatus, PooledConnection};
pub use postgres::PgConnectionFactory;
pub use slot::{Slot, SlotId};
