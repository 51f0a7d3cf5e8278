use std::time::Duration;

/// Default per-stream output ceiling in bytes.
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

/// Engine limits.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Concurrent executions reported as acceptable by `can_accept`.
  pub max_workers: usize,
  /// Bytes kept per stream before truncation.
  pub output_limit: usize,
  /// Used when a task has no positive timeout of its own.
  pub default_timeout: Duration,
  /// Time between SIGTERM and SIGKILL on cancellation.
  pub kill_grace: Duration,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      max_workers: 4,
      output_limit: DEFAULT_OUTPUT_LIMIT,
      default_timeout: Duration::from_secs(3600),
      kill_grace: Duration::from_secs(5),
    }
  }
}
