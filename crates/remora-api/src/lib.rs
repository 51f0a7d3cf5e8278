//! Remora API
//!
//! Local HTTP surface of a running agent, under `/api/v1`:
//!
//! - `GET  /ping`
//! - `POST /tasks` submits a local task
//! - `GET  /tasks/{id}`
//! - `POST /tasks/{id}/cancel`
//! - `GET  /queue/status`
//!
//! Every response is a `{success, code, message, data}` envelope; `code` is
//! `0` on success and one of the authority's business codes otherwise.

mod error;
mod routes;

pub use error::ApiError;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use remora_scheduler::Scheduler;
use remora_store::Store;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Handles shared by every request.
#[derive(Clone)]
pub struct ApiState {
  pub scheduler: Arc<Scheduler>,
  pub store: Arc<dyn Store>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
  pub success: bool,
  pub code: i64,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<T>,
}

impl<T> Envelope<T> {
  fn ok(data: T) -> Json<Self> {
    Json(Self {
      success: true,
      code: 0,
      message: "ok".to_string(),
      data: Some(data),
    })
  }
}

impl Envelope<()> {
  fn empty() -> Json<Self> {
    Json(Self {
      success: true,
      code: 0,
      message: "ok".to_string(),
      data: None,
    })
  }
}

pub fn router(state: ApiState) -> Router {
  let v1 = Router::new()
    .route("/ping", get(routes::ping))
    .route("/tasks", post(routes::create_task))
    .route("/tasks/{id}", get(routes::get_task))
    .route("/tasks/{id}/cancel", post(routes::cancel_task))
    .route("/queue/status", get(routes::queue_status));

  Router::new()
    .nest("/api/v1", v1)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Serve the API on `listener` until `shutdown` fires, letting in-flight
/// requests finish.
pub async fn serve(
  listener: TcpListener,
  state: ApiState,
  shutdown: CancellationToken,
) -> std::io::Result<()> {
  info!(addr = %listener.local_addr()?, "local api listening");
  axum::serve(listener, router(state))
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}
