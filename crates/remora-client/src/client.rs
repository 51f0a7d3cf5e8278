use std::time::Duration;

use async_trait::async_trait;
use remora_task::Task;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use crate::AgentApi;
use crate::error::{ClientError, Operation};

/// Lease length requested on every renewal, in seconds.
pub const LEASE_EXTEND_SECS: u64 = 300;

const API_PREFIX: [&str; 3] = ["api", "v1", "agent"];

/// Connection settings for [`ServerClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub base_url: String,
  pub agent_id: String,
  pub machine_id: String,
  /// Sent as `Authorization: Bearer <token>` when set.
  pub token: Option<String>,
  pub timeout: Duration,
}

impl ClientConfig {
  pub fn new(
    base_url: impl Into<String>,
    agent_id: impl Into<String>,
    machine_id: impl Into<String>,
  ) -> Self {
    Self {
      base_url: base_url.into(),
      agent_id: agent_id.into(),
      machine_id: machine_id.into(),
      token: None,
      timeout: Duration::from_secs(30),
    }
  }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
  code: i64,
  #[serde(default)]
  message: String,
  #[serde(default)]
  data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ClaimData {
  #[serde(default, deserialize_with = "null_as_empty")]
  tasks: Vec<Task>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Task>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<Vec<Task>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Serialize)]
struct ClaimRequest<'a> {
  agent_id: &'a str,
  machine_id: &'a str,
  limit: usize,
  request_id: String,
}

#[derive(Serialize)]
struct StartRequest<'a> {
  agent_id: &'a str,
  attempt_id: &'a str,
}

#[derive(Serialize)]
struct RenewRequest<'a> {
  agent_id: &'a str,
  attempt_id: &'a str,
  extend_sec: u64,
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
  agent_id: &'a str,
  attempt_id: &'a str,
  exit_code: i32,
  stdout: &'a str,
  stderr: &'a str,
  error: &'a str,
}

/// HTTP implementation of [`AgentApi`].
pub struct ServerClient {
  base_url: Url,
  agent_id: String,
  machine_id: String,
  token: Option<String>,
  http: Client,
}

impl ServerClient {
  pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
    let http = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(ClientError::Setup)?;

    let base_url = Url::parse(&config.base_url).map_err(|source| ClientError::InvalidUrl {
      url: config.base_url.clone(),
      source,
    })?;
    if base_url.cannot_be_a_base() {
      return Err(ClientError::InvalidUrl {
        url: config.base_url,
        source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
      });
    }

    Ok(Self {
      base_url,
      agent_id: config.agent_id,
      machine_id: config.machine_id,
      token: config.token.filter(|token| !token.is_empty()),
      http,
    })
  }

  /// `segments` are appended under the API prefix, each percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    // Checked in `new`: the base URL can carry a path.
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(API_PREFIX).extend(segments);
    }
    url
  }

  async fn post<B: Serialize>(
    &self,
    operation: Operation,
    segments: &[&str],
    body: &B,
  ) -> Result<Envelope, ClientError> {
    let url = self.endpoint(segments);
    debug!(%url, %operation, "sending request");

    let mut request = self.http.post(url).json(body);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|source| ClientError::Transport { operation, source })?;
    let status = response.status().as_u16();
    let bytes = response
      .bytes()
      .await
      .map_err(|source| ClientError::Transport { operation, source })?;

    let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
      operation,
      status,
      source,
    })?;

    if envelope.code != 0 {
      return Err(ClientError::Rejected {
        operation,
        code: envelope.code,
        message: envelope.message,
      });
    }

    Ok(envelope)
  }
}

#[async_trait]
impl AgentApi for ServerClient {
  async fn claim_tasks(&self, limit: usize) -> Result<Vec<Task>, ClientError> {
    let request = ClaimRequest {
      agent_id: &self.agent_id,
      machine_id: &self.machine_id,
      limit,
      request_id: uuid::Uuid::new_v4().to_string(),
    };

    let envelope = self.post(Operation::Claim, &["tasks", "claim"], &request).await?;
    let Some(data) = envelope.data else {
      return Ok(Vec::new());
    };
    if data.is_null() {
      return Ok(Vec::new());
    }

    let claim: ClaimData = serde_json::from_value(data).map_err(|source| ClientError::Decode {
      operation: Operation::Claim,
      status: 200,
      source,
    })?;
    Ok(claim.tasks)
  }

  async fn report_start(&self, task_id: &str, attempt_id: &str) -> Result<(), ClientError> {
    let request = StartRequest {
      agent_id: &self.agent_id,
      attempt_id,
    };
    self
      .post(Operation::Start, &["tasks", task_id, "start"], &request)
      .await?;
    Ok(())
  }

  async fn renew_lease(&self, task_id: &str, attempt_id: &str) -> Result<(), ClientError> {
    let request = RenewRequest {
      agent_id: &self.agent_id,
      attempt_id,
      extend_sec: LEASE_EXTEND_SECS,
    };
    self
      .post(
        Operation::RenewLease,
        &["tasks", task_id, "lease", "renew"],
        &request,
      )
      .await?;
    Ok(())
  }

  async fn report_complete(&self, task: &Task) -> Result<(), ClientError> {
    if !task.is_claimed() {
      debug!(task_id = %task.id, "skipping completion report for unclaimed task");
      return Ok(());
    }

    let request = CompleteRequest {
      agent_id: &self.agent_id,
      attempt_id: &task.attempt_id,
      exit_code: task.exit_code,
      stdout: &task.stdout,
      stderr: &task.stderr,
      error: &task.error,
    };
    self
      .post(
        Operation::Complete,
        &["tasks", task.id.as_str(), "complete"],
        &request,
      )
      .await?;
    Ok(())
  }
}
