//! Task controller enforcing at most one active agent task.
//!
//! The agent runs on a background tokio task. Every status transition goes
//! through a `watch` channel so writers are serialized and readers only ever
//! see complete snapshots.

use std::any::Any;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Local;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::action_log::ActionLog;
use super::status::{TaskState, TaskStatus};
use crate::agent::{AgentClient, AgentOutcome, ProgressEvent, ProgressSink};
use crate::config::ConfigSnapshot;

/// Errors raised synchronously by [`TaskController::start`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("No valid configuration; update the configuration first")]
    NotConfigured,
    #[error("A task is already active")]
    AlreadyActive,
    #[error("Instruction must not be empty")]
    EmptyInstruction,
}

struct ActiveTask {
    id: Uuid,
    cancel: CancellationToken,
}

/// Starts, tracks and stops agent tasks for one UI session.
pub struct TaskController {
    agent: Arc<dyn AgentClient>,
    status: Arc<watch::Sender<TaskStatus>>,
    active: Arc<Mutex<Option<ActiveTask>>>,
    log: Arc<Mutex<ActionLog>>,
    runtime: Handle,
}

impl TaskController {
    /// Create a controller that spawns agent runs on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime; use
    /// [`TaskController::with_runtime`] there.
    pub fn new(agent: Arc<dyn AgentClient>) -> Self {
        Self::with_runtime(agent, Handle::current())
    }

    pub fn with_runtime(agent: Arc<dyn AgentClient>, runtime: Handle) -> Self {
        let (status, _) = watch::channel(TaskStatus::default());
        Self {
            agent,
            status: Arc::new(status),
            active: Arc::new(Mutex::new(None)),
            log: Arc::new(Mutex::new(ActionLog::new())),
            runtime,
        }
    }

    /// Start `instruction` with the given configuration snapshot.
    ///
    /// Returns as soon as the task is dispatched; the agent runs in the
    /// background and reports through [`TaskController::status`].
    pub fn start(&self, instruction: &str, config: &ConfigSnapshot) -> Result<Uuid, TaskError> {
        let ConfigSnapshot::Configured(config) = config else {
            return Err(TaskError::NotConfigured);
        };
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(TaskError::EmptyInstruction);
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let accepted = self.status.send_if_modified(|status| {
            if status.state.is_active() {
                return false;
            }
            *status = TaskStatus::started(id, instruction);
            *lock(&self.active) = Some(ActiveTask {
                id,
                cancel: cancel.clone(),
            });
            true
        });
        if !accepted {
            tracing::warn!("Rejected start of '{}': a task is already active", instruction);
            return Err(TaskError::AlreadyActive);
        }

        tracing::info!(task_id = %id, "Starting task: {}", instruction);

        let sink = progress_sink(self.status.clone(), self.log.clone(), id);
        let agent = self.agent.clone();
        let instruction = instruction.to_string();
        let config = config.clone();
        let run = self
            .runtime
            .spawn(async move { agent.run(instruction, config, sink, cancel).await });

        let status = self.status.clone();
        let active = self.active.clone();
        let log = self.log.clone();
        self.runtime.spawn(async move {
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => AgentOutcome::Error(format!(
                    "Agent crashed: {}",
                    panic_message(e.into_panic())
                )),
                Err(e) => AgentOutcome::Error(format!("Agent task aborted: {}", e)),
            };
            finish_task(&status, &log, id, outcome);

            let mut active = lock(&active);
            if active.as_ref().is_some_and(|a| a.id == id) {
                *active = None;
            }
        });

        Ok(id)
    }

    /// Request cooperative cancellation of the running task.
    ///
    /// Returns `false` (and does nothing) when no task is running or a stop
    /// was already requested.
    pub fn stop(&self) -> bool {
        let requested = self.status.send_if_modified(|status| {
            if status.state != TaskState::Running {
                return false;
            }
            status.state = TaskState::StopRequested;
            status.last_message =
                "Stop requested; waiting for the current step to finish".to_string();
            if let Some(active) = lock(&self.active).as_ref() {
                active.cancel.cancel();
            }
            true
        });

        if requested {
            tracing::info!("Stop requested for task: {}", self.status.borrow().instruction);
        } else {
            tracing::debug!("Stop ignored: no running task");
        }
        requested
    }

    /// Snapshot of the current task status.
    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    /// Whether a task is in flight.
    pub fn is_active(&self) -> bool {
        self.status.borrow().state.is_active()
    }

    /// The last `limit` entries of the session's action log, across tasks.
    pub fn action_log(&self, limit: usize) -> Vec<ProgressEvent> {
        lock(&self.log).recent(limit)
    }

    pub fn clear_action_log(&self) {
        lock(&self.log).clear();
        tracing::info!("Action log cleared");
    }

    /// Write the whole action log to `path`; returns the number of entries.
    pub fn export_action_log(&self, path: &Path) -> io::Result<usize> {
        lock(&self.log).export(path)
    }
}

impl Drop for TaskController {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.active).take() {
            tracing::info!(task_id = %active.id, "Controller dropped; cancelling active task");
            active.cancel.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Sink recording progress of task `id` while it is still the active task.
fn progress_sink(
    status: Arc<watch::Sender<TaskStatus>>,
    log: Arc<Mutex<ActionLog>>,
    id: Uuid,
) -> ProgressSink {
    ProgressSink::new(move |event| record_progress(&status, &log, id, event))
}

fn record_progress(
    status: &watch::Sender<TaskStatus>,
    log: &Mutex<ActionLog>,
    id: Uuid,
    event: ProgressEvent,
) {
    let recorded = status.send_if_modified(|status| {
        if !status.accepts_updates_from(id) {
            return false;
        }
        lock(log).record(event.clone());
        status.last_message = event.message.clone();
        status.progress_log.push(event);
        true
    });
    if !recorded {
        tracing::debug!(task_id = %id, "Dropped progress from inactive task");
    }
}

/// Move task `id` into the terminal state matching `outcome`.
///
/// Once a stop was requested the task ends `Stopped` whatever the agent
/// reports; a final message it still produced goes to the progress log.
fn finish_task(
    status: &watch::Sender<TaskStatus>,
    log: &Mutex<ActionLog>,
    id: Uuid,
    outcome: AgentOutcome,
) {
    status.send_if_modified(|status| {
        if !status.accepts_updates_from(id) {
            tracing::debug!(task_id = %id, "Ignoring outcome of inactive task");
            return false;
        }

        let (state, message) = match outcome {
            AgentOutcome::Success(message) | AgentOutcome::Error(message)
                if status.state == TaskState::StopRequested =>
            {
                tracing::info!(
                    task_id = %id,
                    "Task stopped; agent finished its last step: {}",
                    message
                );
                if !message.trim().is_empty() {
                    let event = ProgressEvent::info(format!("Last step finished: {}", message));
                    lock(log).record(event.clone());
                    status.progress_log.push(event);
                }
                (TaskState::Stopped, "Task stopped".to_string())
            }
            AgentOutcome::Success(message) => {
                tracing::info!(task_id = %id, "Task completed: {}", message);
                (TaskState::Completed, non_empty(message, "Task completed"))
            }
            AgentOutcome::Error(message) => {
                tracing::warn!(task_id = %id, "Task failed: {}", message);
                (TaskState::Failed, non_empty(message, "Agent failed without a message"))
            }
            AgentOutcome::Cancelled => {
                tracing::info!(task_id = %id, "Task stopped");
                (TaskState::Stopped, "Task stopped".to_string())
            }
        };

        status.state = state;
        status.last_message = message;
        status.finished_at = Some(Local::now());
        lock(log).record(ProgressEvent::info(status.summary()));
        true
    });
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
