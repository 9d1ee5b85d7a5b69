// HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use switchyard::pool::{ConnectionError, PoolError};
use switchyard::queue::{QueueError, TaskError};

/// Error returned by request handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    InvalidTask(#[from] TaskError),

    #[error("{0} not found")]
    NotFound(String),
}

impl From<ConnectionError> for ApiError {
    fn from(e: ConnectionError) -> Self {
        Self::Pool(PoolError::Connect(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Pool(PoolError::Exhausted { .. } | PoolError::RetryExhausted { .. })
            | Self::Queue(QueueError::TaskRejected) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidTask(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Pool(_) | Self::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
