//! Agent module: the contract the controller drives and its process-backed
//! implementation.

mod client;
mod command;
mod output;

pub use client::{AgentClient, AgentOutcome, ProgressEvent, ProgressKind, ProgressSink};
pub use command::{CommandAgent, DEFAULT_AGENT_COMMAND};
pub use output::{OutputMarkers, OutputParser, ParsedLine, MARKERS_EN, MARKERS_ZH};
