use std::path::PathBuf;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// An environment override could not be parsed.
  #[error("invalid value for {name}: '{value}'")]
  Env { name: &'static str, value: String },

  #[error("invalid config: {message}")]
  Invalid { message: String },
}
