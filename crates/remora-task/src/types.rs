use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serde_ext::{null_as_default, opt_time};
use crate::status::{TaskStatus, TaskType};

/// Priority given to tasks created locally without one. Lower runs first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// A unit of work and its lifecycle record.
///
/// String fields use the empty string for "unset", matching the wire format.
/// In particular an empty `attempt_id` marks a task that was never claimed
/// from the authority and must never be reported to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub task_type: TaskType,

  // Execution spec
  pub command: String,
  #[serde(deserialize_with = "null_as_default")]
  pub args: Vec<String>,
  pub workdir: String,
  #[serde(deserialize_with = "null_as_default")]
  pub env: BTreeMap<String, String>,
  /// Wall-clock limit in seconds. Zero or negative means the engine default.
  pub timeout: i64,

  // Scheduling metadata
  pub priority: i32,
  pub retry_count: i32,
  pub retry_delay: i32,
  pub max_retries: i32,

  // Result fields, owned by the engine during an execution
  pub status: TaskStatus,
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
  pub error: String,

  #[serde(with = "opt_time")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(with = "opt_time")]
  pub assigned_at: Option<DateTime<Utc>>,
  #[serde(with = "opt_time")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(with = "opt_time")]
  pub ended_at: Option<DateTime<Utc>>,

  pub machine_id: String,
  pub group_id: String,
  pub parent_id: String,
  /// Ids of tasks this one is blocked on, in the authority's order.
  #[serde(deserialize_with = "null_as_default")]
  pub depends_on: Vec<String>,

  // Lease
  pub assigned_agent_id: String,
  #[serde(with = "opt_time")]
  pub lease_expires_at: Option<DateTime<Utc>>,
  pub attempt_id: String,

  /// Local only: set once the authority acknowledged `complete`.
  pub synced: bool,
}

impl Task {
  /// Create a locally submitted shell task.
  pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      command: command.into(),
      task_type: TaskType::Shell,
      priority: DEFAULT_PRIORITY,
      ..Default::default()
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_timeout(mut self, seconds: i64) -> Self {
    self.timeout = seconds;
    self
  }

  pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
    self.workdir = workdir.into();
    self
  }

  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  /// Whether the task carries a lease attempt from the authority.
  pub fn is_claimed(&self) -> bool {
    !self.attempt_id.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_task_defaults() {
    let task = Task::new("t1", "echo hi");
    assert_eq!(task.task_type, TaskType::Shell);
    assert_eq!(task.priority, DEFAULT_PRIORITY);
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(!task.is_claimed());
    assert!(!task.synced);
  }

  #[test]
  fn test_decode_claimed_task_from_authority() {
    let json = serde_json::json!({
      "id": "task-1",
      "name": "train",
      "type": "python",
      "command": "python",
      "args": ["train.py", "--epochs", "3"],
      "workdir": "/srv/job",
      "env": {"CUDA_VISIBLE_DEVICES": "0"},
      "timeout": 600,
      "priority": 2,
      "status": "assigned",
      "created_at": "2026-02-05T10:00:00Z",
      "assigned_at": "2026-02-05T10:00:05Z",
      "started_at": "0001-01-01T00:00:00Z",
      "ended_at": "0001-01-01T00:00:00Z",
      "machine_id": "m-1",
      "depends_on": ["task-0"],
      "assigned_agent_id": "agent-1",
      "lease_expires_at": "2026-02-05T10:05:05Z",
      "attempt_id": "att-9",
      "some_future_field": true
    });

    let task: Task = serde_json::from_value(json).unwrap();
    assert_eq!(task.task_type, TaskType::Python);
    assert_eq!(task.args, vec!["train.py", "--epochs", "3"]);
    assert_eq!(task.env["CUDA_VISIBLE_DEVICES"], "0");
    assert_eq!(task.status, TaskStatus::Assigned);
    assert!(task.created_at.is_some());
    assert!(task.started_at.is_none());
    assert!(task.ended_at.is_none());
    assert_eq!(task.depends_on, vec!["task-0"]);
    assert!(task.is_claimed());
  }

  #[test]
  fn test_decode_null_collections() {
    let json = serde_json::json!({
      "id": "task-2",
      "command": "true",
      "args": null,
      "env": null,
      "depends_on": null,
      "lease_expires_at": null
    });

    let task: Task = serde_json::from_value(json).unwrap();
    assert!(task.args.is_empty());
    assert!(task.env.is_empty());
    assert!(task.depends_on.is_empty());
    assert!(task.lease_expires_at.is_none());
  }

  #[test]
  fn test_timestamps_encode_as_rfc3339_or_null() {
    let mut task = Task::new("t", "true");
    task.created_at = Some("2026-02-05T10:00:00Z".parse().unwrap());

    let value = serde_json::to_value(&task).unwrap();
    assert_eq!(value["created_at"], "2026-02-05T10:00:00+00:00");
    assert!(value["ended_at"].is_null());
    assert_eq!(value["type"], "shell");
  }
}
