use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use remora_task::Task;
use sqlx::FromRow;
use sqlx::types::Json;

use crate::StoreError;

/// A task as stored in the `local_tasks` table.
#[derive(Debug, FromRow)]
pub(crate) struct TaskRow {
  pub id: String,
  pub name: String,
  pub task_type: String,
  pub command: String,
  pub args: Json<Vec<String>>,
  pub workdir: String,
  pub env: Json<BTreeMap<String, String>>,
  pub timeout: i64,
  pub priority: i32,
  pub retry_count: i32,
  pub retry_delay: i32,
  pub max_retries: i32,
  pub status: String,
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
  pub error: String,
  pub created_at: Option<DateTime<Utc>>,
  pub assigned_at: Option<DateTime<Utc>>,
  pub started_at: Option<DateTime<Utc>>,
  pub ended_at: Option<DateTime<Utc>>,
  pub machine_id: String,
  pub group_id: String,
  pub parent_id: String,
  pub depends_on: Json<Vec<String>>,
  pub assigned_agent_id: String,
  pub lease_expires_at: Option<DateTime<Utc>>,
  pub attempt_id: String,
  pub synced: bool,
}

impl TryFrom<TaskRow> for Task {
  type Error = StoreError;

  fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
    let corrupt = |message: String| StoreError::Corrupt {
      id: row.id.clone(),
      message,
    };
    let status = row.status.parse().map_err(|e| corrupt(format!("{e}")))?;
    let task_type = row.task_type.parse().map_err(|e| corrupt(format!("{e}")))?;

    Ok(Task {
      id: row.id,
      name: row.name,
      task_type,
      command: row.command,
      args: row.args.0,
      workdir: row.workdir,
      env: row.env.0,
      timeout: row.timeout,
      priority: row.priority,
      retry_count: row.retry_count,
      retry_delay: row.retry_delay,
      max_retries: row.max_retries,
      status,
      exit_code: row.exit_code,
      stdout: row.stdout,
      stderr: row.stderr,
      error: row.error,
      created_at: row.created_at,
      assigned_at: row.assigned_at,
      started_at: row.started_at,
      ended_at: row.ended_at,
      machine_id: row.machine_id,
      group_id: row.group_id,
      parent_id: row.parent_id,
      depends_on: row.depends_on.0,
      assigned_agent_id: row.assigned_agent_id,
      lease_expires_at: row.lease_expires_at,
      attempt_id: row.attempt_id,
      synced: row.synced,
    })
  }
}
