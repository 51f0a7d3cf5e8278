//! Remora Config
//!
//! Agent configuration. Values come from, in increasing precedence:
//! - built-in defaults
//! - a JSON file (explicit path, or the first of [`search_paths`] that exists)
//! - environment variables (`AGENT_PORT`, `AGENT_DB_PATH`,
//!   `AGENT_MAX_WORKERS`, `SERVER_URL`, `AGENT_ID`, `MACHINE_ID`,
//!   `AGENT_TOKEN`)
//!
//! A malformed file or override is an error, never silently ignored.

mod error;
mod types;

pub use error::ConfigError;
pub use types::{
  AgentConfig, ApiConfig, LeaseConfig, LimitsConfig, PollConfig, ServerConfig, SyncConfig,
};

use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Config file name looked up in each search directory.
pub const CONFIG_FILE_NAME: &str = "agent.json";

/// Locations tried, in order, when no explicit config file is given.
pub fn search_paths() -> Vec<PathBuf> {
  let mut paths = vec![PathBuf::from(".").join(CONFIG_FILE_NAME)];
  if let Some(dir) = dirs::config_dir() {
    paths.push(dir.join("remora").join(CONFIG_FILE_NAME));
  }
  paths.push(PathBuf::from("/etc/remora").join(CONFIG_FILE_NAME));
  paths
}

impl AgentConfig {
  /// Load configuration from `path`, or from the search paths when `path`
  /// is `None`, then apply environment overrides and validate.
  ///
  /// An explicit path must exist; a missing search path is skipped.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => match search_paths().into_iter().find(|p| p.is_file()) {
        Some(found) => Self::from_file(&found)?,
        None => {
          debug!("no config file found, using defaults");
          Self::default()
        }
      },
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
  }

  /// Parse a JSON config file. Missing fields take their defaults.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    info!(path = %path.display(), "loaded config file");
    Ok(config)
  }

  /// Apply environment overrides using `lookup` to read variables. Empty
  /// values are ignored.
  pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

    if let Some(value) = get("AGENT_PORT") {
      self.api.port = value.parse().map_err(|_| ConfigError::Env {
        name: "AGENT_PORT",
        value,
      })?;
    }
    if let Some(value) = get("AGENT_DB_PATH") {
      self.db_path = PathBuf::from(value);
    }
    if let Some(value) = get("AGENT_MAX_WORKERS") {
      self.max_workers = value.parse().map_err(|_| ConfigError::Env {
        name: "AGENT_MAX_WORKERS",
        value,
      })?;
    }
    if let Some(value) = get("SERVER_URL") {
      self.server.url = value;
    }
    if let Some(value) = get("AGENT_ID") {
      self.server.agent_id = value;
    }
    if let Some(value) = get("MACHINE_ID") {
      self.server.machine_id = value;
    }
    if let Some(value) = get("AGENT_TOKEN") {
      self.server.token = value;
    }
    Ok(())
  }

  /// Reject settings the agent cannot run with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let checks = [
      (self.max_workers == 0, "max_workers must be at least 1"),
      (self.poll.batch_size == 0, "poll.batch_size must be at least 1"),
      (self.poll.interval_secs == 0, "poll.interval_secs must be positive"),
      (self.sync.interval_secs == 0, "sync.interval_secs must be positive"),
      (self.server.timeout_secs == 0, "server.timeout_secs must be positive"),
      (self.limits.max_output_size == 0, "limits.max_output_size must be positive"),
    ];

    match checks.into_iter().find(|(failed, _)| *failed) {
      Some((_, message)) => Err(ConfigError::Invalid {
        message: message.to_string(),
      }),
      None => Ok(()),
    }
  }

  /// Whether enough is set to talk to an authority.
  pub fn server_configured(&self) -> bool {
    !self.server.url.is_empty()
      && !self.server.agent_id.is_empty()
      && !self.server.machine_id.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::io::Write;

  fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name| map.get(name).cloned()
  }

  fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_defaults() {
    let config = AgentConfig::default();
    assert_eq!(config.db_path, PathBuf::from("/var/lib/remora/tasks.db"));
    assert_eq!(config.max_workers, 4);
    assert_eq!(config.server.timeout_secs, 30);
    assert_eq!(config.poll.interval_secs, 5);
    assert_eq!(config.poll.batch_size, 10);
    assert_eq!(config.sync.interval_secs, 30);
    assert_eq!(config.lease.renew_interval_secs, 200);
    assert_eq!(config.limits.max_output_size, 1024 * 1024);
    assert!(config.security.allowed_commands.is_empty());
    assert_eq!(config.api.bind_addr(), "127.0.0.1:8090");
    assert!(config.api.enabled());
    assert!(!config.server_configured());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_file_overrides_defaults_partially() {
    let file = write_config(
      r#"{
        "max_workers": 8,
        "server": {"url": "http://authority:8080", "agent_id": "a1", "machine_id": "m1"},
        "poll": {"batch_size": 2},
        "security": {"blocked_patterns": ["rm -rf"]}
      }"#,
    );

    let config = AgentConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_workers, 8);
    assert_eq!(config.poll.batch_size, 2);
    assert_eq!(config.poll.interval_secs, 5);
    assert_eq!(config.server.timeout_secs, 30);
    assert_eq!(config.security.blocked_patterns, vec!["rm -rf"]);
    assert!(config.server_configured());
  }

  #[test]
  fn test_malformed_file_is_an_error() {
    let file = write_config("{ max_workers: ");
    let err = AgentConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let err = AgentConfig::load(Some(Path::new("/nonexistent/remora/agent.json"))).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }

  #[test]
  fn test_env_overrides() {
    let mut config = AgentConfig::default();
    config
      .apply_env(env(&[
        ("AGENT_DB_PATH", "/tmp/remora.db"),
        ("AGENT_MAX_WORKERS", "2"),
        ("SERVER_URL", "http://authority"),
        ("AGENT_ID", "agent-7"),
        ("MACHINE_ID", "machine-7"),
        ("AGENT_TOKEN", "secret"),
        ("AGENT_PORT", "0"),
      ]))
      .unwrap();

    assert_eq!(config.db_path, PathBuf::from("/tmp/remora.db"));
    assert_eq!(config.max_workers, 2);
    assert_eq!(config.server.token, "secret");
    assert!(config.server_configured());
    assert!(!config.api.enabled());
  }

  #[test]
  fn test_empty_env_values_are_ignored() {
    let mut config = AgentConfig::default();
    config.apply_env(env(&[("SERVER_URL", "")])).unwrap();
    assert!(config.server.url.is_empty());
  }

  #[test]
  fn test_bad_env_value_is_an_error() {
    let mut config = AgentConfig::default();
    let err = config
      .apply_env(env(&[("AGENT_MAX_WORKERS", "many")]))
      .unwrap_err();
    assert!(matches!(err, ConfigError::Env { name: "AGENT_MAX_WORKERS", .. }));

    let mut config = AgentConfig::default();
    let err = config.apply_env(env(&[("AGENT_PORT", "70000")])).unwrap_err();
    assert!(matches!(err, ConfigError::Env { name: "AGENT_PORT", .. }));
  }

  #[test]
  fn test_validate_rejects_zero_values() {
    let mut config = AgentConfig::default();
    config.max_workers = 0;
    assert!(config.validate().is_err());

    let mut config = AgentConfig::default();
    config.poll.batch_size = 0;
    assert!(config.validate().is_err());

    let mut config = AgentConfig::default();
    config.sync.interval_secs = 0;
    assert!(config.validate().is_err());

    // Zero disables renewal rather than being invalid.
    let mut config = AgentConfig::default();
    config.lease.renew_interval_secs = 0;
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_search_paths_order() {
    let paths = search_paths();
    assert_eq!(paths.first().unwrap(), &PathBuf::from("./agent.json"));
    assert_eq!(paths.last().unwrap(), &PathBuf::from("/etc/remora/agent.json"));
  }
}
