//! Phone Agent Console - conversational terminal front end
//!
//! Configure the agent, send natural-language instructions and watch them run.
//! Run with: cargo run --bin phone-agent-console [-- --json] [instruction...]

use std::env;
use std::path::Path;
use std::sync::Arc;

use phone_agent_console::agent::CommandAgent;
use phone_agent_console::config::{ConfigFields, ConfigSnapshot, ConfigStore, Configuration};
use phone_agent_console::device::{ConnectionCheck, DeviceManager};
use phone_agent_console::model::ModelProbe;
use phone_agent_console::task::{TaskController, TaskStatus, RECENT_LOG_ENTRIES};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const HELP: &str = "\
Commands:
  <instruction>        start a task, e.g. 打开微信
  /stop                request the running task to stop
  /status              show the current task status
  /config              show the active configuration
  /set <field> <value> change base_url, model, api_key, device_type, device_id, lang or max_steps
  /devices             list devices for the configured bridge
  /probe               check the model endpoint
  /log [clear|export <file>]  show, clear or save the session's action log
  /quit                exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let json_output = args.iter().any(|a| a == "--json");
    let instruction = args
        .iter()
        .filter(|a| *a != "--json")
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    let mut fields = ConfigFields::from_env();
    let store = ConfigStore::new();
    match store.update(&fields) {
        Ok(config) => println!(
            "⚙️  {} @ {} ({})",
            config.model, config.base_url, config.device_type
        ),
        Err(e) => println!("⚠️  {}\n   Use /set to complete the configuration.", e),
    }

    let agent = CommandAgent::from_env();
    tracing::info!(program = agent.program(), "Using agent command");
    let controller = TaskController::new(Arc::new(agent));
    tokio::spawn(print_progress(controller.subscribe()));

    if !instruction.is_empty() {
        controller.start(&instruction, &store.current())?;
        let status = wait_with_interrupts(&controller).await;
        if json_output {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        return Ok(());
    }

    println!("🤖 Phone Agent Console. Type an instruction, or /help.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                if controller.stop() {
                    println!("⏹️  Stop requested");
                    continue;
                }
                None
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/stop" => {
                if !controller.stop() {
                    println!("ℹ️  No running task");
                }
            }
            "/status" => println!("{}", controller.status().summary()),
            "/config" => match store.current() {
                ConfigSnapshot::Configured(config) => {
                    println!("{}", serde_json::to_string_pretty(config.as_ref())?)
                }
                ConfigSnapshot::Unconfigured => println!("❌ Not configured"),
            },
            "/set" => {
                let (field, value) =
                    rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
                match with_field(&fields, field, value.trim()) {
                    Some(candidate) => match store.update(&candidate) {
                        Ok(_) => {
                            fields = candidate;
                            println!("✅ Configuration updated");
                        }
                        Err(e) => println!("❌ {}", e),
                    },
                    None => println!("❌ Unknown field: {}", field),
                }
            }
            "/devices" => match store.current() {
                ConfigSnapshot::Configured(config) => {
                    let (summary, check) = device_check(config).await?;
                    println!("{}\n{}", summary, check.message);
                }
                ConfigSnapshot::Unconfigured => println!("❌ Not configured"),
            },
            "/log" => match rest.trim().split_once(' ').unwrap_or((rest.trim(), "")) {
                ("", _) => {
                    let entries = controller.action_log(RECENT_LOG_ENTRIES);
                    if entries.is_empty() {
                        println!("ℹ️  No actions logged yet");
                    }
                    for event in entries {
                        println!("{}", event.format_display());
                    }
                }
                ("clear", _) => {
                    controller.clear_action_log();
                    println!("✅ Action log cleared");
                }
                ("export", path) if !path.trim().is_empty() => {
                    match controller.export_action_log(Path::new(path.trim())) {
                        Ok(count) => println!("✅ Exported {} entries to {}", count, path.trim()),
                        Err(e) => println!("❌ Export failed: {}", e),
                    }
                }
                _ => println!("Usage: /log [clear|export <file>]"),
            },
            "/probe" => match store.current() {
                ConfigSnapshot::Configured(config) => {
                    match ModelProbe::new().probe(&config).await {
                        Ok(report) => println!("✅ {}", report.summary(&config.model)),
                        Err(e) => println!("❌ {}", e),
                    }
                }
                ConfigSnapshot::Unconfigured => println!("❌ Not configured"),
            },
            _ if command.starts_with('/') => println!("Unknown command. {}", HELP),
            _ => {
                let snapshot = store.current();
                if let Some(config) = snapshot.configuration() {
                    let (_, check) = device_check(config.clone()).await?;
                    if !check.connected {
                        println!("⚠️  {}", check.message);
                    }
                }
                match controller.start(line, &snapshot) {
                    Ok(_) => println!("🚀 Started: {}", line),
                    Err(e) => println!("❌ {}", e),
                }
            }
        }
    }

    controller.stop();
    Ok(())
}

/// Scan devices off the async runtime; returns the summary and a precheck.
async fn device_check(config: Arc<Configuration>) -> anyhow::Result<(String, ConnectionCheck)> {
    let result = tokio::task::spawn_blocking(move || {
        let mut manager = DeviceManager::new(config.device_type);
        let check = manager.check_connection(config.device_id.as_deref());
        (manager.summary(), check)
    })
    .await?;
    Ok(result)
}

/// Copy of `fields` with one field replaced.
fn with_field(fields: &ConfigFields, field: &str, value: &str) -> Option<ConfigFields> {
    let fields = fields.clone();
    Some(match field {
        "base_url" => fields.with_base_url(value),
        "model" => fields.with_model(value),
        "api_key" => fields.with_api_key(value),
        "device_type" => fields.with_device_type(value),
        "device_id" => fields.with_device_id(value),
        "lang" | "language" => fields.with_language(value),
        "max_steps" => fields.with_max_steps(value),
        _ => return None,
    })
}

/// Wait for the task to finish; the first Ctrl-C requests a stop.
async fn wait_with_interrupts(controller: &TaskController) -> TaskStatus {
    let mut rx = controller.subscribe();
    loop {
        tokio::select! {
            changed = rx.wait_for(|s| s.state.is_terminal()) => {
                return match changed {
                    Ok(status) => status.clone(),
                    Err(_) => controller.status(),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                if controller.stop() {
                    println!("⏹️  Stop requested; waiting for the current step to finish");
                }
            }
        }
    }
}

/// Print progress entries as they arrive, and the outcome of each task.
async fn print_progress(mut rx: watch::Receiver<TaskStatus>) {
    let mut current: Option<Uuid> = None;
    let mut printed = 0;
    let mut reported_end = false;

    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        if status.task_id != current {
            current = status.task_id;
            printed = 0;
            reported_end = false;
        }
        for event in status.progress_log.iter().skip(printed) {
            println!("{}", event.format_display());
        }
        printed = status.progress_log.len();
        if status.state.is_terminal() && !reported_end {
            reported_end = true;
            println!("{}", status.summary());
        }
    }
}
