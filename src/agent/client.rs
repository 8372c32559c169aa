//! Contract between the task controller and the phone agent.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Configuration;

/// Kind of a progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressKind {
    Info,
    Thinking,
    Performance,
    Action,
    Takeover,
}

impl ProgressKind {
    /// Get display string for the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKind::Info => "INFO",
            ProgressKind::Thinking => "THINK",
            ProgressKind::Performance => "PERF",
            ProgressKind::Action => "ACTION",
            ProgressKind::Takeover => "TAKEOVER",
        }
    }

    /// Get emoji for the kind.
    pub fn emoji(&self) -> &'static str {
        match self {
            ProgressKind::Info => "ℹ️",
            ProgressKind::Thinking => "💭",
            ProgressKind::Performance => "⏱️",
            ProgressKind::Action => "🎯",
            ProgressKind::Takeover => "🤝",
        }
    }
}

/// One incremental progress report from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Local::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ProgressKind::Info, message)
    }

    /// Format the event for display.
    pub fn format_display(&self) -> String {
        format!(
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.kind.emoji(),
            self.message
        )
    }

    /// Format the event for file storage.
    pub fn format_file(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind.as_str(),
            self.message
        )
    }
}

/// How an agent run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Finished; carries the agent's final message.
    Success(String),
    /// Gave up or crashed; carries a human-readable summary.
    Error(String),
    /// Honoured a cancellation request.
    Cancelled,
}

/// Receiver for progress events of one run.
///
/// Events must be emitted in the order they happen; the controller records
/// them in call order.
#[derive(Clone)]
pub struct ProgressSink {
    callback: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
}

impl ProgressSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Sink that drops everything.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: ProgressEvent) {
        (self.callback)(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::info(message));
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink")
    }
}

/// Executes one instruction on a device.
///
/// Implementations must check `cancel` between discrete device-interaction
/// steps and return [`AgentOutcome::Cancelled`] once they stop because of it.
/// An in-flight step is never interrupted.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn run(
        &self,
        instruction: String,
        config: Arc<Configuration>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> AgentOutcome;
}
