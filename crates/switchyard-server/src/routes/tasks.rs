// Task intake HTTP routes

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use switchyard::pool::{ConnectionFactory, RecordStore};
use switchyard::queue::{Admitted, Task};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub id: Uuid,
    pub admitted: Admitted,
}

/// Create task routes
pub fn routes<F>(state: AppState<F>) -> Router
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    Router::new()
        .route("/v1/tasks", post(create_task::<F>))
        .with_state(state)
}

/// POST /v1/tasks - Queue a task; the body must be a JSON object
pub async fn create_task<F>(
    State(state): State<AppState<F>>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<TaskAccepted>), ApiError>
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    let task = Task::from_value(body)?;
    let id = task.id();
    let admitted = state.queue.push(task).await?;

    Ok((StatusCode::ACCEPTED, Json(TaskAccepted { id, admitted })))
}
