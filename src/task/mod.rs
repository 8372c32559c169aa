//! Task orchestration: the single-active-task controller and its status model.

mod action_log;
mod controller;
mod status;

pub use action_log::{ActionLog, DEFAULT_LOG_CAPACITY, RECENT_LOG_ENTRIES};
pub use controller::{TaskController, TaskError};
pub use status::{TaskState, TaskStatus};
