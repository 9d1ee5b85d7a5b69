// Server configuration loaded from the environment

use std::str::FromStr;
use std::time::Duration;

use switchyard::pool::PoolConfig;
use switchyard::queue::QueueConfig;
use switchyard::RetryPolicy;

/// Process configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_address: String,

    /// PostgreSQL URL; the in-memory backend is used when absent
    pub database_url: Option<String>,

    /// Origins allowed by CORS; empty means same-origin only
    pub cors_allowed_origins: Vec<String>,

    pub pool: PoolConfig,
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9300".to_string(),
            database_url: None,
            cors_allowed_origins: Vec::new(),
            pool: PoolConfig::default(),
            queue: QueueConfig::default(),
            retry: RetryPolicy::exponential(),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let millis = |name: &str, default: Duration| {
            Duration::from_millis(parse_or(name, var(name), default.as_millis() as u64))
        };

        let pool = PoolConfig::default()
            .with_max_size(parse_or("POOL_MAX", var("POOL_MAX"), defaults.pool.max_size))
            .with_min_size(parse_or("POOL_MIN", var("POOL_MIN"), defaults.pool.min_size))
            .with_acquire_timeout(millis(
                "POOL_ACQUIRE_TIMEOUT_MS",
                defaults.pool.acquire_timeout,
            ))
            .with_test_on_acquire(parse_or(
                "POOL_TEST_ON_ACQUIRE",
                var("POOL_TEST_ON_ACQUIRE"),
                defaults.pool.test_on_acquire,
            ));

        let queue = QueueConfig::default()
            .with_worker_id(parse_or("WORKER_ID", var("WORKER_ID"), defaults.queue.worker_id))
            .with_capacity(parse_or(
                "QUEUE_CAPACITY",
                var("QUEUE_CAPACITY"),
                defaults.queue.capacity,
            ))
            .with_consumer_count(
                parse_or("QUEUE_CONSUMERS", var("QUEUE_CONSUMERS"), num_cpus::get()).max(2),
            )
            .with_batch_size(parse_or(
                "QUEUE_BATCH_SIZE",
                var("QUEUE_BATCH_SIZE"),
                defaults.queue.batch_size,
            ))
            .with_push_timeout(millis("QUEUE_PUSH_TIMEOUT_MS", defaults.queue.push_timeout))
            .with_shutdown_timeout(millis("SHUTDOWN_TIMEOUT_MS", defaults.queue.shutdown_timeout));

        let retry = RetryPolicy::exponential()
            .with_max_attempts(parse_or(
                "RETRY_MAX_ATTEMPTS",
                var("RETRY_MAX_ATTEMPTS"),
                defaults.retry.max_attempts,
            ))
            .with_initial_interval(millis("RETRY_BASE_MS", defaults.retry.initial_interval))
            .with_max_interval(millis("RETRY_CAP_MS", defaults.retry.max_interval));

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_address: var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            database_url: var("DATABASE_URL"),
            cors_allowed_origins,
            pool,
            queue,
            retry,
        }
    }
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(
                variable = name,
                value = %raw,
                "Ignoring unparseable setting, using default"
            );
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.bind_address, "0.0.0.0:9300");
        assert!(config.database_url.is_none());
        assert_eq!(config.pool.max_size, 10);
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.queue.capacity, 1024);
        assert_eq!(config.queue.push_timeout, Duration::from_millis(20));
        assert!(config.queue.consumer_count >= 2);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("DATABASE_URL", "postgres://localhost/app"),
            ("POOL_MIN", "2"),
            ("POOL_MAX", "4"),
            ("POOL_TEST_ON_ACQUIRE", "true"),
            ("QUEUE_CONSUMERS", "3"),
            ("QUEUE_PUSH_TIMEOUT_MS", "5"),
            ("RETRY_CAP_MS", "250"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
        ]);

        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!((config.pool.min_size, config.pool.max_size), (2, 4));
        assert!(config.pool.test_on_acquire);
        assert_eq!(config.queue.consumer_count, 3);
        assert_eq!(config.queue.push_timeout, Duration::from_millis(5));
        assert_eq!(config.retry.max_interval, Duration::from_millis(250));
        assert_eq!(config.cors_allowed_origins.len(), 2);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = config(&[
            ("POOL_MAX", "lots"),
            ("QUEUE_CONSUMERS", "1"),
            ("DATABASE_URL", " "),
        ]);
        assert_eq!(config.pool.max_size, 10);
        assert_eq!(config.queue.consumer_count, 2);
        assert!(config.database_url.is_none());
    }
}
