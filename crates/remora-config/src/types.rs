use std::path::PathBuf;
use std::time::Duration;

use remora_gate::GatePolicy;
use serde::{Deserialize, Serialize};

/// Top-level agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
  /// SQLite database holding local task records.
  pub db_path: PathBuf,
  pub max_workers: usize,
  pub server: ServerConfig,
  pub poll: PollConfig,
  pub sync: SyncConfig,
  pub lease: LeaseConfig,
  pub limits: LimitsConfig,
  pub security: GatePolicy,
  pub api: ApiConfig,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      db_path: PathBuf::from("/var/lib/remora/tasks.db"),
      max_workers: 4,
      server: ServerConfig::default(),
      poll: PollConfig::default(),
      sync: SyncConfig::default(),
      lease: LeaseConfig::default(),
      limits: LimitsConfig::default(),
      security: GatePolicy::default(),
      api: ApiConfig::default(),
    }
  }
}

/// Connection to the task authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub url: String,
  pub agent_id: String,
  pub machine_id: String,
  /// Bearer token; empty sends no `Authorization` header.
  pub token: String,
  pub timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      agent_id: String::new(),
      machine_id: String::new(),
      token: String::new(),
      timeout_secs: 30,
    }
  }
}

impl ServerConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  pub interval_secs: u64,
  pub batch_size: usize,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      interval_secs: 5,
      batch_size: 10,
    }
  }
}

impl PollConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { interval_secs: 30 }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }
}

/// Lease renewal for claimed tasks while they run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
  /// Seconds between renewals; `0` disables renewal.
  pub renew_interval_secs: u64,
}

impl Default for LeaseConfig {
  fn default() -> Self {
    Self {
      renew_interval_secs: 200,
    }
  }
}

impl LeaseConfig {
  pub fn renew_interval(&self) -> Option<Duration> {
    (self.renew_interval_secs > 0).then(|| Duration::from_secs(self.renew_interval_secs))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
  /// Bytes of stdout and of stderr kept per task.
  pub max_output_size: usize,
}

impl Default for LimitsConfig {
  fn default() -> Self {
    Self {
      max_output_size: 1024 * 1024,
    }
  }
}

/// Local HTTP API served by `remora run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub host: String,
  /// `0` disables the API.
  pub port: u16,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 8090,
    }
  }
}

impl ApiConfig {
  pub fn enabled(&self) -> bool {
    self.port != 0
  }

  /// `host:port` to bind.
  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}
