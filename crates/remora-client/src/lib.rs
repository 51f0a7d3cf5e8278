//! Remora Client
//!
//! Client for the authority's lease protocol. Every call is a single JSON
//! POST under `/api/v1/agent` answered with a `{code, message, data}`
//! envelope, where `code == 0` means success.
//!
//! - [`AgentApi`]: the four protocol operations, implemented by
//!   [`ServerClient`] and by test fakes
//! - [`ClientError`]: transport failures and business rejections, kept apart
//! - [`RemoteCode`]: the authority's known rejection codes

mod client;
mod codes;
mod error;

pub use client::{ClientConfig, LEASE_EXTEND_SECS, ServerClient};
pub use codes::RemoteCode;
pub use error::{ClientError, Operation};

use async_trait::async_trait;
use remora_task::Task;

/// Operations the agent performs against the task authority.
#[async_trait]
pub trait AgentApi: Send + Sync {
  /// Claim up to `limit` pending tasks, in the order the authority chose.
  async fn claim_tasks(&self, limit: usize) -> Result<Vec<Task>, ClientError>;

  /// Tell the authority the attempt has started running.
  async fn report_start(&self, task_id: &str, attempt_id: &str) -> Result<(), ClientError>;

  /// Extend the attempt's lease.
  async fn renew_lease(&self, task_id: &str, attempt_id: &str) -> Result<(), ClientError>;

  /// Report the final result. A task without an `attempt_id` was never
  /// claimed and is not reported.
  async fn report_complete(&self, task: &Task) -> Result<(), ClientError>;
}

