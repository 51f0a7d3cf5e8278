//! Remora Gate
//!
//! Command policy for task execution. A [`Gate`] holds an optional allow-list
//! of exact command names and a list of blocked substrings. It has no state
//! beyond its policy, so one gate is shared by every concurrent execution.

use serde::{Deserialize, Serialize};

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
  /// An allow-list is configured and the command is not on it.
  #[error("command '{command}' not in allowed list")]
  NotAllowed { command: String },

  /// The command line contains a blocked pattern.
  #[error("command matches blocked pattern '{pattern}'")]
  Blocked { pattern: String },
}

/// Policy as it appears in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
  pub allowed_commands: Vec<String>,
  pub blocked_patterns: Vec<String>,
}

/// Command validator.
#[derive(Debug, Clone, Default)]
pub struct Gate {
  allowed_commands: Vec<String>,
  blocked_patterns: Vec<String>,
}

impl Gate {
  pub fn new(allowed_commands: Vec<String>, blocked_patterns: Vec<String>) -> Self {
    Self {
      allowed_commands,
      blocked_patterns,
    }
  }

  pub fn from_policy(policy: &GatePolicy) -> Self {
    Self::new(
      policy.allowed_commands.clone(),
      policy.blocked_patterns.clone(),
    )
  }

  /// Whether any policy is configured. Callers skip validation when this is
  /// false rather than treating it as an implicit pass.
  pub fn enabled(&self) -> bool {
    !self.allowed_commands.is_empty() || !self.blocked_patterns.is_empty()
  }

  /// Check a command and its arguments against the policy.
  ///
  /// The allow-list is matched against `command` exactly. Blocked patterns are
  /// matched as substrings of `command` followed by a space and the
  /// space-joined `args`, whether or not an allow-list is configured.
  pub fn validate(&self, command: &str, args: &[String]) -> Result<(), GateError> {
    if !self.allowed_commands.is_empty()
      && !self.allowed_commands.iter().any(|allowed| allowed == command)
    {
      return Err(GateError::NotAllowed {
        command: command.to_string(),
      });
    }

    let full = format!("{} {}", command, args.join(" "));
    if let Some(pattern) = self
      .blocked_patterns
      .iter()
      .find(|pattern| full.contains(pattern.as_str()))
    {
      return Err(GateError::Blocked {
        pattern: pattern.clone(),
      });
    }

    Ok(())
  }
}
