//! Remora Executor
//!
//! Runs one [`Task`](remora_task::Task) at a time per call as an OS process
//! in its own process group, with:
//!
//! - output capped per stream by [`OutputBuffer`]
//! - a wall-clock timeout that kills the whole group
//! - two-phase cancellation (SIGTERM, then SIGKILL after a grace window)
//! - an optional [`Gate`](remora_gate::Gate) checked before anything spawns
//!
//! Every outcome is recorded in the task itself; `execute` never fails.

mod config;
mod error;
mod executor;
mod output;
mod signal;

pub use config::ExecutorConfig;
pub use error::ExecutionError;
pub use executor::Executor;
pub use output::{OutputBuffer, TRUNCATION_MARKER};
