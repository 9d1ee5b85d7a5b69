//! Connection and ConnectionFactory trait definitions

use async_trait::async_trait;

/// Error type for connection-level operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Could not establish a new connection
    #[error("failed to connect: {0}")]
    Connect(String),

    /// An established connection stopped working
    #[error("connection is no longer usable: {0}")]
    Broken(String),

    /// A statement failed on an otherwise healthy connection
    #[error("query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A single exclusive handle to the backing resource.
///
/// The pool never shares one connection between two borrowers, so
/// implementations need `Send` but not `Sync`.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Cheap liveness check
    async fn ping(&mut self) -> Result<(), ConnectionError>;

    /// Close the connection gracefully
    async fn close(self) -> Result<(), ConnectionError>
    where
        Self: Sized;
}

/// Opens new connections on demand.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(&self) -> Result<Self::Connection, ConnectionError>;
}

/// Minimal keyed record access, implemented by every backend.
///
/// Request handlers use it to write a record through one pooled
/// connection and read it back through another.
#[async_trait]
pub trait RecordStore: Connection {
    async fn put_record(
        &mut self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), ConnectionError>;

    async fn get_record(&mut self, key: &str) -> Result<Option<serde_json::Value>, ConnectionError>;
}
