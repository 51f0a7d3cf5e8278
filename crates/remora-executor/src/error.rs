//! Execution failures as recorded in a task's `error` field.

use std::io;

use remora_gate::GateError;

/// Why an execution did not complete cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
  /// The security gate refused the command; nothing was spawned.
  #[error("command rejected: {0}")]
  Rejected(#[from] GateError),

  #[error("failed to start process: {0}")]
  Spawn(#[source] io::Error),

  #[error("failed to wait for process: {0}")]
  Wait(#[source] io::Error),

  #[error("timed out after {seconds}s")]
  Timeout { seconds: u64 },

  #[error("exit status {code}")]
  Exited { code: i32 },

  #[error("terminated by signal {signal}")]
  Signaled { signal: i32 },

  #[error("cancelled")]
  Cancelled,
}
