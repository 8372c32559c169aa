// Copyright 2025 Zhipu AI (Original Python implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Phone Agent Console
//!
//! Conversational front end for a phone-automation agent.
//!
//! The console owns a validated [`Configuration`] (endpoint, model, credential,
//! device bridge and language), accepts natural-language instructions, runs
//! at most one agent task at a time in the background and keeps a
//! [`TaskStatus`] that any number of readers can snapshot or subscribe to.
//!
//! The agent itself sits behind the [`AgentClient`] trait. [`CommandAgent`]
//! drives an external agent process and turns its console output into
//! progress events.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use phone_agent_console::{CommandAgent, ConfigFields, ConfigStore, TaskController};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ConfigStore::new();
//!     store.update(
//!         &ConfigFields::default()
//!             .with_base_url("https://api.parasail.io/v1")
//!             .with_model("parasail-auto-glm-9b-multilingual")
//!             .with_api_key("psk-...")
//!             .with_device_type("adb")
//!             .with_language("cn"),
//!     )?;
//!
//!     let controller = TaskController::new(Arc::new(CommandAgent::from_env()));
//!     controller.start("打开微信", &store.current())?;
//!
//!     let mut updates = controller.subscribe();
//!     let status = updates.wait_for(|s| s.state.is_terminal()).await?.clone();
//!     println!("{}", status.summary());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod device;
pub mod model;
pub mod task;

pub use agent::{AgentClient, AgentOutcome, CommandAgent, ProgressEvent, ProgressKind, ProgressSink};
pub use config::{
    ApiKey, ConfigFields, ConfigSnapshot, ConfigStore, Configuration, DeviceType, Language,
    ValidationError,
};
pub use device::{DeviceInfo, DeviceManager, DeviceStatus};
pub use model::{ModelProbe, ProbeError, ProbeReport};
pub use task::{ActionLog, TaskController, TaskError, TaskState, TaskStatus};
