use std::fmt;

use thiserror::Error;

use crate::codes::RemoteCode;

/// The protocol call that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Claim,
  Start,
  RenewLease,
  Complete,
}

impl Operation {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Claim => "claim",
      Self::Start => "start",
      Self::RenewLease => "renew lease",
      Self::Complete => "complete",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Errors returned by the protocol client.
#[derive(Debug, Error)]
pub enum ClientError {
  /// The configured base URL cannot address the API.
  #[error("invalid server url '{url}': {source}")]
  InvalidUrl {
    url: String,
    #[source]
    source: url::ParseError,
  },

  /// The HTTP client could not be constructed.
  #[error("failed to build http client: {0}")]
  Setup(#[source] reqwest::Error),

  /// The request never produced a response (connect, timeout, reset).
  #[error("{operation} request failed: {source}")]
  Transport {
    operation: Operation,
    #[source]
    source: reqwest::Error,
  },

  /// The authority answered with a non-zero business code.
  #[error("{operation} rejected by server (code {code}): {message}")]
  Rejected {
    operation: Operation,
    code: i64,
    message: String,
  },

  /// The response body was not the expected envelope.
  #[error("{operation} returned an undecodable body (http {status}): {source}")]
  Decode {
    operation: Operation,
    status: u16,
    #[source]
    source: serde_json::Error,
  },
}

impl ClientError {
  /// Whether the authority itself refused the request.
  pub fn is_rejection(&self) -> bool {
    matches!(self, Self::Rejected { .. })
  }

  /// The catalogued business code, when this is a known rejection.
  pub fn remote_code(&self) -> Option<RemoteCode> {
    match self {
      Self::Rejected { code, .. } => RemoteCode::from_code(*code),
      _ => None,
    }
  }
}
