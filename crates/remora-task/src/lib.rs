//! Remora Task
//!
//! The [`Task`] is both the execution spec handed to the agent by the remote
//! authority and the result record the agent reports back. The engine fills in
//! the result fields in place; the store persists the whole record together
//! with the local `synced` flag.

mod serde_ext;
mod status;
mod types;

pub use status::{ParseStatusError, TaskStatus, TaskType};
pub use types::{DEFAULT_PRIORITY, Task};
