// Record HTTP routes
//
// A write goes through one pooled connection and is then read back with
// the visibility retry, so the response only reports what every session
// can already see.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchyard::pool::{ConnectionFactory, RecordStore};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PutRecordRequest {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Serialize)]
pub struct Record {
    pub key: String,
    pub value: Value,
}

/// Create record routes
pub fn routes<F>(state: AppState<F>) -> Router
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    Router::new()
        .route("/v1/records", post(put_record::<F>))
        .route("/v1/records/:key", get(get_record::<F>))
        .with_state(state)
}

/// POST /v1/records - Write a record and confirm it is visible
pub async fn put_record<F>(
    State(state): State<AppState<F>>,
    Json(req): Json<PutRecordRequest>,
) -> Result<(StatusCode, Json<Record>), ApiError>
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    {
        let mut conn = state.admission.admit().await?;
        conn.put_record(&req.key, &req.value).await?;
    }

    let key = req.key;
    let value = state
        .pool
        .force_retry_connection(
            &state.read_retry,
            |conn| {
                let key = key.clone();
                Box::pin(async move { conn.get_record(&key).await.map_err(ApiError::from) })
            },
            Option::is_some,
        )
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("record {key}")))?;

    Ok((StatusCode::CREATED, Json(Record { key, value })))
}

/// GET /v1/records/:key - Read a record
pub async fn get_record<F>(
    State(state): State<AppState<F>>,
    Path(key): Path<String>,
) -> Result<Json<Record>, ApiError>
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    let value = state
        .pool
        .with_connection(|conn| {
            let key = key.clone();
            Box::pin(async move { conn.get_record(&key).await.map_err(ApiError::from) })
        })
        .await?;

    match value {
        Some(value) => Ok(Json(Record { key, value })),
        None => Err(ApiError::NotFound(format!("record {key}"))),
    }
}
