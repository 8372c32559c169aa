//! Agent client backed by an external phone-agent process.
//!
//! The process receives its configuration through the `PHONE_AGENT_*`
//! environment variables and the instruction as its last argument. Its stdout
//! is parsed into progress events; cancellation is honoured only while no
//! device action is in flight, after which the process is killed and reaped.

use std::collections::VecDeque;
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::client::{AgentClient, AgentOutcome, ProgressSink};
use super::output::OutputParser;
use crate::config::Configuration;

/// Default agent command line.
pub const DEFAULT_AGENT_COMMAND: &str = "python main.py";

/// Number of stderr lines kept for error summaries.
const STDERR_TAIL_LINES: usize = 20;

/// Runs each instruction as one invocation of an external agent program.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl Default for CommandAgent {
    fn default() -> Self {
        Self::from_command_line(DEFAULT_AGENT_COMMAND)
    }
}

impl CommandAgent {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Build from a whitespace separated command line.
    pub fn from_command_line(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self::new(program, parts.collect())
    }

    /// Read `PHONE_AGENT_COMMAND` and `PHONE_AGENT_WORKDIR`.
    pub fn from_env() -> Self {
        let command_line = env::var("PHONE_AGENT_COMMAND")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_COMMAND.to_string());
        let mut agent = Self::from_command_line(&command_line);
        if let Ok(dir) = env::var("PHONE_AGENT_WORKDIR") {
            agent = agent.with_working_dir(dir);
        }
        agent
    }

    /// Run the agent program from `dir`.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command(&self, instruction: &str, config: &Configuration) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(instruction)
            .env("PHONE_AGENT_BASE_URL", &config.base_url)
            .env("PHONE_AGENT_MODEL", &config.model)
            .env("PHONE_AGENT_API_KEY", config.api_key.expose())
            .env("PHONE_AGENT_DEVICE_TYPE", config.device_type.as_str())
            .env("PHONE_AGENT_LANG", config.language.as_code())
            .env("PHONE_AGENT_MAX_STEPS", config.max_steps.to_string())
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &config.device_id {
            Some(id) => cmd.env("PHONE_AGENT_DEVICE_ID", id),
            None => cmd.env_remove("PHONE_AGENT_DEVICE_ID"),
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl AgentClient for CommandAgent {
    async fn run(
        &self,
        instruction: String,
        config: Arc<Configuration>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> AgentOutcome {
        if cancel.is_cancelled() {
            return AgentOutcome::Cancelled;
        }

        let mut child = match self.command(&instruction, &config).spawn() {
            Ok(child) => child,
            Err(e) => {
                return AgentOutcome::Error(format!(
                    "Failed to start agent `{}`: {}",
                    self.program, e
                ));
            }
        };
        tracing::info!(pid = ?child.id(), program = %self.program, "Agent process started");
        progress.info(format!("Agent started: {}", instruction));

        let stderr_tail = tokio::spawn(collect_tail(child.stderr.take(), STDERR_TAIL_LINES));
        let Some(stdout) = child.stdout.take() else {
            return AgentOutcome::Error("Agent stdout was not captured".to_string());
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = OutputParser::new();
        let mut steps_done = 0u32;

        loop {
            let next = tokio::select! {
                next = lines.next_line() => next,
                _ = cancel.cancelled(), if !parser.action_in_flight() => {
                    return terminate(&mut child, steps_done).await;
                }
            };

            match next {
                Ok(Some(line)) => {
                    tracing::debug!(target: "agent_output", "{}", line);
                    let parsed = parser.push_line(&line);
                    for event in parsed.events {
                        progress.emit(event);
                    }
                    if parsed.step_boundary {
                        steps_done += 1;
                        tracing::debug!(steps_done, "Agent finished a step");
                    }
                    if cancel.is_cancelled() && !parser.action_in_flight() {
                        return terminate(&mut child, steps_done).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read agent output: {}", e);
                    break;
                }
            }
        }

        for event in parser.finish() {
            progress.emit(event);
        }

        let status = child.wait().await;
        let tail = stderr_tail.await.unwrap_or_default();

        match status {
            Ok(status) if status.success() => AgentOutcome::Success(
                parser
                    .final_message()
                    .unwrap_or("Task completed")
                    .to_string(),
            ),
            Ok(status) => {
                let detail = if tail.is_empty() {
                    parser.final_message().unwrap_or_default().to_string()
                } else {
                    tail
                };
                AgentOutcome::Error(format!("Agent exited with {}: {}", status, detail))
            }
            Err(e) => AgentOutcome::Error(format!("Failed to wait for agent: {}", e)),
        }
    }
}

/// Kill the agent at a safe point and acknowledge the cancellation.
async fn terminate(child: &mut Child, steps_done: u32) -> AgentOutcome {
    tracing::info!(
        pid = ?child.id(),
        steps_done,
        "Stopping agent process at step boundary"
    );
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill agent process: {}", e);
    }
    AgentOutcome::Cancelled
}

async fn collect_tail<R>(reader: Option<R>, max_lines: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(max_lines);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == max_lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ProgressEvent, ProgressKind};
    use crate::config::ConfigFields;
    use std::time::{Duration, Instant};

    fn config() -> Arc<Configuration> {
        Arc::new(
            ConfigFields::default()
                .with_base_url("https://api.example.com/v1")
                .with_model("m1")
                .with_api_key("k")
                .with_device_type("adb")
                .with_language("en")
                .validate()
                .unwrap(),
        )
    }

    #[test]
    fn test_from_command_line() {
        let agent = CommandAgent::from_command_line("python3 main.py --verbose");
        assert_eq!(agent.program(), "python3");
        assert_eq!(agent.args(), ["main.py", "--verbose"]);

        let agent = CommandAgent::default();
        assert_eq!(agent.program(), "python");
        assert_eq!(agent.args(), ["main.py"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_as_error() {
        let agent = CommandAgent::new("/nonexistent/phone-agent-binary", Vec::new());
        let outcome = agent
            .run(
                "open app X".to_string(),
                config(),
                ProgressSink::discard(),
                CancellationToken::new(),
            )
            .await;

        match outcome {
            AgentOutcome::Error(message) => assert!(message.contains("Failed to start agent")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let agent = CommandAgent::new("/nonexistent/phone-agent-binary", Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = agent
            .run("open app X".to_string(), config(), ProgressSink::discard(), cancel)
            .await;
        assert_eq!(outcome, AgentOutcome::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_script_and_reports_final_message() {
        use std::sync::Mutex;

        let script = r#"echo "💭 Thinking:"; echo "launch the app"; echo "🎯 Action:"; echo "do(action=\"Launch\", app=\"X\")"; echo "=========="; echo "✅ Task Completed: opened $PHONE_AGENT_MODEL""#;
        let agent = CommandAgent::new("sh", vec!["-c".to_string(), script.to_string()]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(move |e| seen.lock().unwrap().push(e.kind))
        };

        let outcome = agent
            .run("open app X".to_string(), config(), sink, CancellationToken::new())
            .await;

        assert_eq!(outcome, AgentOutcome::Success("opened m1".to_string()));
        let kinds = seen.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![ProgressKind::Info, ProgressKind::Thinking, ProgressKind::Action]
        );
    }

    /// Sink collecting event kinds; cancels `cancel` once an action arrives.
    fn cancel_on_action(
        cancel: CancellationToken,
    ) -> (ProgressSink, Arc<std::sync::Mutex<Vec<ProgressKind>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(move |e: ProgressEvent| {
                if e.kind == ProgressKind::Action {
                    cancel.cancel();
                }
                seen.lock().unwrap().push(e.kind);
            })
        };
        (sink, seen)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_between_steps_kills_process() {
        let script = r#"echo "💭 Thinking:"; echo "plan"; echo "⏱️ Performance Metrics:"; echo "0.1s"; echo "=========="; sleep 10; echo "🎯 Action:"; echo "do(action=\"Tap\")""#;
        let agent = CommandAgent::new("sh", vec!["-c".to_string(), script.to_string()]);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let idle = Arc::new(tokio::sync::Notify::new());
        let sink = {
            let seen = seen.clone();
            let idle = idle.clone();
            ProgressSink::new(move |e: ProgressEvent| {
                if e.kind == ProgressKind::Performance {
                    idle.notify_one();
                }
                seen.lock().unwrap().push(e.kind);
            })
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            idle.notified().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = agent
            .run("open app X".to_string(), config(), sink, cancel)
            .await;

        assert_eq!(outcome, AgentOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        let kinds = seen.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![ProgressKind::Info, ProgressKind::Thinking, ProgressKind::Performance]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_during_action_waits_for_step_boundary() {
        let script = r#"for i in 1 2 3 4 5; do echo "💭 Thinking:"; echo "step $i"; echo "🎯 Action:"; echo "do(action=\"Tap\")"; echo "=========="; sleep 0.3; done"#;
        let agent = CommandAgent::new("sh", vec!["-c".to_string(), script.to_string()]);

        let cancel = CancellationToken::new();
        let (sink, seen) = cancel_on_action(cancel.clone());

        let started = Instant::now();
        let outcome = agent
            .run("open app X".to_string(), config(), sink, cancel)
            .await;

        assert_eq!(outcome, AgentOutcome::Cancelled);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(started.elapsed() < Duration::from_secs(2));
        let kinds = seen.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![ProgressKind::Info, ProgressKind::Thinking, ProgressKind::Action]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let agent = CommandAgent::new(
            "sh",
            vec!["-c".to_string(), "echo 'device offline' >&2; exit 3".to_string()],
        );
        let outcome = agent
            .run(
                "open app X".to_string(),
                config(),
                ProgressSink::discard(),
                CancellationToken::new(),
            )
            .await;

        match outcome {
            AgentOutcome::Error(message) => assert!(message.contains("device offline")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
