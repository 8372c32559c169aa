//! Task state machine and the status snapshot handed to presenters.

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::agent::ProgressEvent;

/// Lifecycle state of the controller's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TaskState {
    /// No task has been started yet.
    #[default]
    Idle,
    Running,
    /// Cancellation was requested; the agent has not acknowledged it yet.
    StopRequested,
    Completed,
    Failed,
    Stopped,
}

impl TaskState {
    /// Whether a task is in flight (`Running` or `StopRequested`).
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::StopRequested)
    }

    /// Check if this is a terminal state (lasts until the next start)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Stopped
        )
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Idle => "Idle",
            TaskState::Running => "Running",
            TaskState::StopRequested => "Stopping",
            TaskState::Completed => "Completed",
            TaskState::Failed => "Failed",
            TaskState::Stopped => "Stopped",
        }
    }

    /// Get a symbol for the state
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskState::Idle => "🔴",
            TaskState::Running => "🟢",
            TaskState::StopRequested => "⏳",
            TaskState::Completed => "✅",
            TaskState::Failed => "❌",
            TaskState::Stopped => "⏹️",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Snapshot of the current (or most recent) task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// Identifier of the task this status describes.
    pub task_id: Option<Uuid>,
    pub instruction: String,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    /// Latest progress message, or the outcome summary once terminal.
    pub last_message: String,
    /// Progress entries in the order the agent emitted them.
    pub progress_log: Vec<ProgressEvent>,
}

impl TaskStatus {
    /// Fresh `Running` status for a newly started task.
    pub(crate) fn started(task_id: Uuid, instruction: &str) -> Self {
        Self {
            state: TaskState::Running,
            task_id: Some(task_id),
            instruction: instruction.to_string(),
            started_at: Some(Local::now()),
            finished_at: None,
            last_message: String::new(),
            progress_log: Vec::new(),
        }
    }

    /// Whether this status still belongs to the in-flight task `task_id`.
    pub(crate) fn accepts_updates_from(&self, task_id: Uuid) -> bool {
        self.task_id == Some(task_id) && self.state.is_active()
    }

    /// One-line summary for status displays.
    pub fn summary(&self) -> String {
        match self.state {
            TaskState::Idle => format!("{} {}", self.state.symbol(), self.state),
            _ if self.last_message.is_empty() => format!(
                "{} {} - {}",
                self.state.symbol(),
                self.state,
                self.instruction
            ),
            _ => format!(
                "{} {} - {}: {}",
                self.state.symbol(),
                self.state,
                self.instruction,
                self.last_message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_classification() {
        assert_eq!(TaskState::default(), TaskState::Idle);
        assert!(!TaskState::Idle.is_active());
        assert!(!TaskState::Idle.is_terminal());
        assert!(TaskState::Running.is_active());
        assert!(TaskState::StopRequested.is_active());
        for state in [TaskState::Completed, TaskState::Failed, TaskState::Stopped] {
            assert!(state.is_terminal());
            assert!(!state.is_active());
        }
    }

    #[test]
    fn test_started_status() {
        let id = Uuid::new_v4();
        let status = TaskStatus::started(id, "open app X");
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(status.instruction, "open app X");
        assert!(status.started_at.is_some());
        assert!(status.progress_log.is_empty());
        assert!(status.accepts_updates_from(id));
        assert!(!status.accepts_updates_from(Uuid::new_v4()));
    }

    #[test]
    fn test_summary() {
        assert_eq!(TaskStatus::default().summary(), "🔴 Idle");

        let mut status = TaskStatus::started(Uuid::new_v4(), "open app X");
        assert_eq!(status.summary(), "🟢 Running - open app X");

        status.state = TaskState::Completed;
        status.last_message = "done".to_string();
        assert_eq!(status.summary(), "✅ Completed - open app X: done");
    }
}
