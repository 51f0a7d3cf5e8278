use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use chrono::Utc;
use remora_scheduler::QueueStatus;
use remora_task::{DEFAULT_PRIORITY, Task, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ApiError, ApiState, Envelope};

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTaskRequest {
  #[serde(default)]
  name: String,
  #[serde(default, rename = "type")]
  task_type: String,
  #[serde(default)]
  command: String,
  #[serde(default)]
  args: Vec<String>,
  #[serde(default)]
  workdir: String,
  #[serde(default)]
  env: BTreeMap<String, String>,
  #[serde(default)]
  timeout: i64,
  #[serde(default)]
  priority: i32,
}

impl CreateTaskRequest {
  fn into_task(self) -> Result<Task, ApiError> {
    if self.command.trim().is_empty() {
      return Err(ApiError::InvalidParams("command is required".to_string()));
    }
    let task_type = if self.task_type.is_empty() {
      TaskType::Shell
    } else {
      self
        .task_type
        .parse::<TaskType>()
        .map_err(|e| ApiError::InvalidParams(e.to_string()))?
    };

    Ok(Task {
      id: uuid::Uuid::new_v4().to_string(),
      name: self.name,
      task_type,
      command: self.command,
      args: self.args,
      workdir: self.workdir,
      env: self.env,
      timeout: self.timeout,
      priority: if self.priority == 0 {
        DEFAULT_PRIORITY
      } else {
        self.priority
      },
      status: TaskStatus::Pending,
      created_at: Some(Utc::now()),
      ..Default::default()
    })
  }
}

#[derive(Debug, Serialize)]
pub(crate) struct Pong {
  ok: bool,
}

pub(crate) async fn ping() -> Json<Envelope<Pong>> {
  Envelope::ok(Pong { ok: true })
}

pub(crate) async fn create_task(
  State(state): State<ApiState>,
  body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<Json<Envelope<Task>>, ApiError> {
  let Json(request) = body.map_err(|e| ApiError::InvalidParams(e.body_text()))?;
  let task = request.into_task()?;

  state.scheduler.submit(task.clone()).await?;
  info!(task_id = %task.id, command = %task.command, "local task submitted");
  Ok(Envelope::ok(task))
}

pub(crate) async fn get_task(
  State(state): State<ApiState>,
  Path(id): Path<String>,
) -> Result<Json<Envelope<Task>>, ApiError> {
  let task = state.store.get(&id).await?;
  Ok(Envelope::ok(task))
}

pub(crate) async fn cancel_task(
  State(state): State<ApiState>,
  Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
  if state.scheduler.cancel(&id).await? {
    Ok(Envelope::empty())
  } else {
    Err(ApiError::NotFound)
  }
}

pub(crate) async fn queue_status(State(state): State<ApiState>) -> Json<Envelope<QueueStatus>> {
  Envelope::ok(state.scheduler.status())
}
