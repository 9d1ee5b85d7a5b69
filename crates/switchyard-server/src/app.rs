// Application assembly: state, router and shutdown sequence

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use switchyard::pool::{ConnectionFactory, ConnectionPool, PoolAdmission, RecordStore};
use switchyard::queue::TaskQueue;
use switchyard::Metrics;

use crate::config::ServerConfig;
use crate::processor::RecordWriter;
use crate::routes;
use crate::state::AppState;

/// Open the pool, start the queue, and bundle both into request state
pub async fn build_state<F>(config: &ServerConfig, factory: F) -> Result<AppState<F>>
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    let metrics = Metrics::new();

    let pool = ConnectionPool::connect(factory, config.pool.clone(), Arc::clone(&metrics))
        .await
        .context("Failed to open connection pool")?;
    let pool = Arc::new(pool);
    let admission = PoolAdmission::new(Arc::clone(&pool), config.retry.clone());

    let queue = Arc::new(TaskQueue::new(config.queue.clone(), Arc::clone(&metrics)));
    queue
        .start(RecordWriter::new(admission.clone()))
        .context("Failed to start task queue")?;

    Ok(AppState {
        pool,
        admission,
        queue,
        metrics,
        read_retry: config.retry.clone(),
    })
}

/// Build the full router: routes, optional CORS, request tracing
pub fn router<F>(state: AppState<F>, config: &ServerConfig) -> Router
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    let app = Router::new()
        .merge(routes::health::routes(state.clone()))
        .merge(routes::tasks::routes(state.clone()))
        .merge(routes::records::routes(state));

    let cors_origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Add CORS layer only if origins are configured
    let app = if cors_origins.is_empty() {
        app
    } else {
        info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
        )
    };

    app.layer(TraceLayer::new_for_http())
}

/// Stop the queue, then close the pool the queue's handler writes through
pub async fn shutdown<F: ConnectionFactory>(state: &AppState<F>) {
    if let Err(e) = state.queue.shutdown().await {
        warn!(error = %e, "Task queue did not stop cleanly");
    }
    state.pool.close().await;
    info!("Shutdown complete");
}
