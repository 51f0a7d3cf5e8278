//! Remora Scheduler
//!
//! Owns the path from "a task arrived" to "its result is durable and
//! reported". Submitted tasks are persisted as pending, held in a priority
//! queue and handed to the executor while it has free workers. For a task
//! claimed from the authority, a run is:
//!
//! 1. the gate check; a refused command skips straight to step 5
//! 2. `report_start`
//! 3. lease renewal every `renew_interval` while the process runs
//! 4. execution
//! 5. persist the result
//! 6. `report_complete`, marking the task synced on success
//!
//! Each dispatched task carries a cancellation token owned by the
//! scheduler, so a cancel lands whether or not its process has spawned.
//!
//! A result the authority did not acknowledge stays unsynced in the store
//! for the syncer to deliver later.

mod queue;
mod scheduler;

pub use queue::TaskQueue;
pub use scheduler::{QueueStatus, Scheduler, SchedulerConfig};

use remora_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  /// A task with this id is already queued or running.
  #[error("task '{id}' is already scheduled")]
  AlreadyScheduled { id: String },

  #[error(transparent)]
  Store(#[from] StoreError),
}
