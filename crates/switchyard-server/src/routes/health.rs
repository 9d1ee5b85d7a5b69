// Health and stats routes

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use switchyard::pool::{ConnectionFactory, PoolStatus};
use switchyard::queue::QueueStatus;
use switchyard::MetricsSnapshot;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub worker_id: usize,
    pub pool: PoolStatus,
    pub queue: QueueStatus,
    pub queued: usize,
}

pub fn routes<F>(state: AppState<F>) -> Router
where
    F: ConnectionFactory,
{
    Router::new()
        .route("/health", get(health::<F>))
        .route("/v1/stats", get(stats::<F>))
        .with_state(state)
}

/// GET /health
pub async fn health<F>(State(state): State<AppState<F>>) -> Json<HealthResponse>
where
    F: ConnectionFactory,
{
    let pool = state.pool.status();
    let queue = state.queue.status();
    let status = if queue == QueueStatus::Running && !pool.closed {
        "ok"
    } else {
        "stopping"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        worker_id: state.queue.config().worker_id,
        pool,
        queue,
        queued: state.queue.len(),
    })
}

/// GET /v1/stats - Metrics snapshot
pub async fn stats<F>(State(state): State<AppState<F>>) -> Json<MetricsSnapshot>
where
    F: ConnectionFactory,
{
    Json(state.metrics.snapshot())
}
