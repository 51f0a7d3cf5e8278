use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use remora_client::RemoteCode;
use remora_scheduler::SchedulerError;
use remora_store::StoreError;
use tracing::error;

use crate::Envelope;

/// Errors a handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("task not found")]
  NotFound,

  #[error("invalid params: {0}")]
  InvalidParams(String),

  #[error(transparent)]
  Scheduler(SchedulerError),

  #[error(transparent)]
  Store(StoreError),
}

impl From<StoreError> for ApiError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::NotFound(_) => Self::NotFound,
      other => Self::Store(other),
    }
  }
}

impl From<SchedulerError> for ApiError {
  fn from(e: SchedulerError) -> Self {
    match e {
      SchedulerError::Store(inner) => inner.into(),
      other => Self::Scheduler(other),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, code, message) = match &self {
      Self::NotFound => (
        StatusCode::NOT_FOUND,
        RemoteCode::TaskNotFound,
        self.to_string(),
      ),
      Self::InvalidParams(_) => (
        StatusCode::BAD_REQUEST,
        RemoteCode::InvalidParams,
        self.to_string(),
      ),
      Self::Scheduler(SchedulerError::AlreadyScheduled { .. }) => (
        StatusCode::CONFLICT,
        RemoteCode::InvalidParams,
        self.to_string(),
      ),
      // Storage details stay in the log.
      Self::Scheduler(_) | Self::Store(_) => {
        error!(error = %self, "request failed");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          RemoteCode::Internal,
          "internal error".to_string(),
        )
      }
    };

    let body = Envelope::<()> {
      success: false,
      code: code.code(),
      message,
      data: None,
    };
    (status, Json(body)).into_response()
  }
}
