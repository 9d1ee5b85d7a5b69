//! PostgreSQL connection backend
//!
//! Each pooled slot owns one dedicated `sqlx::PgConnection`; the
//! switchyard pool does the pooling, so sqlx's own `PgPool` is not used.

use async_trait::async_trait;
use sqlx::{Connection as _, PgConnection, Row};
use tracing::{debug, error, instrument};

use super::connection::{Connection, ConnectionError, ConnectionFactory, RecordStore};

const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS switchyard_records (
    key TEXT PRIMARY KEY,
    value JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Opens dedicated PostgreSQL connections
///
/// # Example
///
/// ```ignore
/// use switchyard::pool::{ConnectionPool, PgConnectionFactory, PoolConfig};
///
/// let factory = PgConnectionFactory::new("postgres://localhost/mydb");
/// factory.ensure_schema().await?;
/// let pool = ConnectionPool::connect(factory, PoolConfig::default(), metrics).await?;
/// ```
#[derive(Clone)]
pub struct PgConnectionFactory {
    url: String,
}

impl PgConnectionFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Create the records table if it does not exist yet
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), ConnectionError> {
        let mut conn = self.connect().await?;
        sqlx::query(CREATE_RECORDS_TABLE)
            .execute(&mut conn)
            .await
            .map_err(|e| {
                error!("Failed to create records table: {}", e);
                ConnectionError::Query(e.to_string())
            })?;
        Connection::close(conn).await
    }
}

impl std::fmt::Debug for PgConnectionFactory {
    // The URL may carry credentials
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnectionFactory")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, ConnectionError> {
        let conn = PgConnection::connect(&self.url)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        debug!("Opened PostgreSQL connection");
        Ok(conn)
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn ping(&mut self) -> Result<(), ConnectionError> {
        sqlx::Connection::ping(self)
            .await
            .map_err(|e| ConnectionError::Broken(e.to_string()))
    }

    async fn close(self) -> Result<(), ConnectionError> {
        sqlx::Connection::close(self)
            .await
            .map_err(|e| ConnectionError::Broken(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for PgConnection {
    #[instrument(skip(self, value))]
    async fn put_record(
        &mut self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), ConnectionError> {
        sqlx::query(
            r#"
            INSERT INTO switchyard_records (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *self)
        .await
        .map_err(|e| {
            error!("Failed to write record: {}", e);
            ConnectionError::Query(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_record(
        &mut self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, ConnectionError> {
        let row = sqlx::query("SELECT value FROM switchyard_records WHERE key = $1")
            .bind(key)
            .fetch_optional(&mut *self)
            .await
            .map_err(|e| ConnectionError::Query(e.to_string()))?;

        row.map(|row| {
            row.try_get::<serde_json::Value, _>("value")
                .map_err(|e| ConnectionError::Serialization(e.to_string()))
        })
        .transpose()
    }
}
