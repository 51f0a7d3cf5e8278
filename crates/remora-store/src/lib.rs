//! Remora Store
//!
//! Durable record of every task this agent has seen. The store owns the
//! `synced` flag: a finished task stays unsynced until the authority has
//! acknowledged its result, and the syncer selects on nothing else.
//!
//! The [`Store`] trait defines operations for:
//! - Saving (inserting or replacing) a task
//! - Fetching a task by id, or all tasks in a status
//! - Listing finished tasks whose result was not acknowledged
//! - Marking a result acknowledged

mod sqlite;
mod types;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use remora_task::{Task, TaskStatus};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested task was not found.
  #[error("task not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// The schema could not be brought up to date.
  #[error("migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// A stored row could not be turned back into a task.
  #[error("corrupt task record '{id}': {message}")]
  Corrupt { id: String, message: String },
}

/// Storage trait for task records.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert the task, or replace every field of an existing one.
  async fn save(&self, task: &Task) -> Result<(), StoreError>;

  /// Get a task by id.
  async fn get(&self, task_id: &str) -> Result<Task, StoreError>;

  /// Tasks in `status`, lowest priority value first, then oldest first.
  async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;

  /// Finished tasks (completed, failed or cancelled) not yet acknowledged
  /// by the authority.
  async fn list_unsynced(&self) -> Result<Vec<Task>, StoreError>;

  /// Record that the authority acknowledged the task's result.
  async fn mark_synced(&self, task_id: &str) -> Result<(), StoreError>;

  /// Remove a task. Deleting a missing task is not an error.
  async fn delete(&self, task_id: &str) -> Result<(), StoreError>;
}
