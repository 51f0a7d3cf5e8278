use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a stored status or type string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseStatusError {
  kind: &'static str,
  value: String,
}

/// Lifecycle state of a task.
///
/// ```text
/// pending -> assigned -> running -> completed | failed | cancelled | preempted
///                        running -> suspended
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  #[default]
  Pending,
  Assigned,
  Running,
  Completed,
  Failed,
  Cancelled,
  Preempted,
  Suspended,
}

impl TaskStatus {
  /// Terminal states never leave this agent again.
  ///
  /// `preempted` and `suspended` are not terminal: the authority moves them
  /// back to `pending`.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Assigned => "assigned",
      Self::Running => "running",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
      Self::Preempted => "preempted",
      Self::Suspended => "suspended",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = ParseStatusError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(Self::Pending),
      "assigned" => Ok(Self::Assigned),
      "running" => Ok(Self::Running),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      "cancelled" => Ok(Self::Cancelled),
      "preempted" => Ok(Self::Preempted),
      "suspended" => Ok(Self::Suspended),
      other => Err(ParseStatusError {
        kind: "task status",
        value: other.to_string(),
      }),
    }
  }
}

/// Kind of work a task carries. Informational only: every kind is run as a
/// process built from `command` and `args`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
  #[default]
  Shell,
  Python,
  Script,
}

impl TaskType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Shell => "shell",
      Self::Python => "python",
      Self::Script => "script",
    }
  }
}

impl fmt::Display for TaskType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskType {
  type Err = ParseStatusError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      // Older rows were written before the type column had a default.
      "" | "shell" => Ok(Self::Shell),
      "python" => Ok(Self::Python),
      "script" => Ok(Self::Script),
      other => Err(ParseStatusError {
        kind: "task type",
        value: other.to_string(),
      }),
    }
  }
}
