//! Parser turning phone-agent console output into progress events.
//!
//! The agent prints each step as a block:
//!
//! ```text
//! ==================================================
//! 💭 思考过程:
//! --------------------------------------------------
//! ...
//! --------------------------------------------------
//! 🎯 执行动作:
//! {"_metadata": "do", "action": "Tap", ...}
//! ==================================================
//! ```
//!
//! Section headers exist in Chinese and English; both are recognised
//! regardless of the configured language.

use once_cell::sync::Lazy;
use regex::Regex;

use super::client::{ProgressEvent, ProgressKind};

/// Section headers printed by the agent in one language.
#[derive(Debug, Clone)]
pub struct OutputMarkers {
    pub thinking: &'static str,
    pub performance: &'static str,
    pub action: &'static str,
    pub task_completed: &'static str,
    pub press_enter_when_done: &'static str,
}

/// Chinese markers
pub static MARKERS_ZH: OutputMarkers = OutputMarkers {
    thinking: "思考过程",
    performance: "性能指标",
    action: "执行动作",
    task_completed: "任务完成",
    press_enter_when_done: "完成后按回车继续",
};

/// English markers
pub static MARKERS_EN: OutputMarkers = OutputMarkers {
    thinking: "Thinking",
    performance: "Performance Metrics",
    action: "Action",
    task_completed: "Task Completed",
    press_enter_when_done: "Press Enter when done",
};

static ALL_MARKERS: [&OutputMarkers; 2] = [&MARKERS_ZH, &MARKERS_EN];

const PARSING_ACTION: &str = "Parsing action:";
const TAKEOVER_PROMPT: &str = "Press Enter after completing manual operation";

static ACTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""?action"?\s*[=:]\s*"([^"]+)""#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Thinking,
    Performance,
    Action,
}

impl Section {
    fn kind(self) -> ProgressKind {
        match self {
            Section::Thinking => ProgressKind::Thinking,
            Section::Performance => ProgressKind::Performance,
            Section::Action => ProgressKind::Action,
        }
    }
}

/// Result of feeding one line to the parser.
#[derive(Debug, Default)]
pub struct ParsedLine {
    pub events: Vec<ProgressEvent>,
    /// The previous step's action has finished and the agent moved on.
    pub step_boundary: bool,
}

/// Incremental parser for agent stdout.
#[derive(Debug, Default)]
pub struct OutputParser {
    section: Option<Section>,
    buffer: Vec<String>,
    /// An action was reported since the last step boundary.
    action_pending: bool,
    final_message: Option<String>,
    last_line: Option<String>,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of output.
    pub fn push_line(&mut self, raw: &str) -> ParsedLine {
        let mut parsed = ParsedLine::default();
        let line = raw.trim();
        if line.is_empty() {
            return parsed;
        }

        if let Some(section) = section_header(line) {
            self.flush(&mut parsed.events);
            if section == Section::Thinking && self.action_pending {
                self.action_pending = false;
                parsed.step_boundary = true;
            }
            self.section = Some(section);
            return parsed;
        }

        if is_rule(line, '=') {
            self.flush(&mut parsed.events);
            return parsed;
        }

        if let Some(rest) = line.split_once(PARSING_ACTION).map(|(_, rest)| rest.trim()) {
            self.flush(&mut parsed.events);
            self.action_pending = true;
            parsed
                .events
                .push(ProgressEvent::new(ProgressKind::Action, describe_action(rest)));
            return parsed;
        }

        if is_takeover_prompt(line) {
            parsed.events.push(ProgressEvent::new(
                ProgressKind::Takeover,
                "Manual operation required on the device",
            ));
            return parsed;
        }

        if let Some(message) = completion_message(line) {
            self.flush(&mut parsed.events);
            self.final_message = Some(message);
            return parsed;
        }

        if self.section.is_some() {
            if !is_rule(line, '-') {
                self.buffer.push(line.to_string());
            }
        } else {
            self.last_line = Some(line.to_string());
        }

        parsed
    }

    /// Flush whatever section is still open at end of output.
    pub fn finish(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        self.flush(&mut events);
        events
    }

    /// A device action was announced and the agent has not moved past it.
    pub fn action_in_flight(&self) -> bool {
        self.action_pending || self.section == Some(Section::Action)
    }

    /// Final message announced by the agent, or its last loose output line.
    pub fn final_message(&self) -> Option<&str> {
        self.final_message.as_deref().or(self.last_line.as_deref())
    }

    fn flush(&mut self, events: &mut Vec<ProgressEvent>) {
        let Some(section) = self.section.take() else {
            return;
        };
        let body = std::mem::take(&mut self.buffer);
        if body.is_empty() {
            return;
        }

        let message = match section {
            Section::Action => {
                self.action_pending = true;
                describe_action(&body.join(" "))
            }
            _ => body.join("\n"),
        };
        events.push(ProgressEvent::new(section.kind(), message));
    }
}

/// Strip leading emoji and other decoration.
fn undecorated(line: &str) -> &str {
    line.trim_start_matches(|c: char| !c.is_alphanumeric())
}

fn header_rest<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let rest = undecorated(line).strip_prefix(marker)?.trim_start();
    rest.strip_prefix(':')
        .or_else(|| rest.strip_prefix('：'))
        .map(str::trim)
}

fn section_header(line: &str) -> Option<Section> {
    ALL_MARKERS.iter().find_map(|m| {
        let is_header = |marker: &str| header_rest(line, marker).is_some_and(str::is_empty);
        if is_header(m.thinking) {
            Some(Section::Thinking)
        } else if is_header(m.performance) {
            Some(Section::Performance)
        } else if is_header(m.action) {
            Some(Section::Action)
        } else {
            None
        }
    })
}

fn completion_message(line: &str) -> Option<String> {
    ALL_MARKERS.iter().find_map(|m| {
        header_rest(line, m.task_completed)
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    })
}

fn is_takeover_prompt(line: &str) -> bool {
    line.contains(TAKEOVER_PROMPT)
        || ALL_MARKERS
            .iter()
            .any(|m| line.contains(m.press_enter_when_done))
}

fn is_rule(line: &str, ch: char) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == ch)
}

/// Short description of an action: its name when one can be found.
fn describe_action(raw: &str) -> String {
    match ACTION_NAME.captures(raw) {
        Some(caps) => format!("{} ({})", &caps[1], raw),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut OutputParser, text: &str) -> (Vec<ProgressEvent>, usize) {
        let mut events = Vec::new();
        let mut boundaries = 0;
        for line in text.lines() {
            let parsed = parser.push_line(line);
            events.extend(parsed.events);
            if parsed.step_boundary {
                boundaries += 1;
            }
        }
        events.extend(parser.finish());
        (events, boundaries)
    }

    #[test]
    fn test_parses_step_blocks() {
        let output = "\
==================================================
💭 思考过程:
--------------------------------------------------
需要打开微信
--------------------------------------------------
🎯 执行动作:
{\"_metadata\": \"do\", \"action\": \"Launch\", \"app\": \"微信\"}
==================================================

==================================================
💭 思考过程:
--------------------------------------------------
微信已打开
--------------------------------------------------
🎯 执行动作:
{\"_metadata\": \"finish\", \"message\": \"done\"}
==================================================

🎉 ================================================
✅ 任务完成: 已打开微信
==================================================";

        let mut parser = OutputParser::new();
        let (events, boundaries) = feed(&mut parser, output);

        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProgressKind::Thinking,
                ProgressKind::Action,
                ProgressKind::Thinking,
                ProgressKind::Action,
            ]
        );
        assert_eq!(events[0].message, "需要打开微信");
        assert!(events[1].message.starts_with("Launch ("));
        assert_eq!(boundaries, 1);
        assert_eq!(parser.final_message(), Some("已打开微信"));
    }

    #[test]
    fn test_parses_english_headers_and_performance() {
        let output = "\
💭 Thinking:
Open the settings app
⏱️  Performance Metrics:
latency 1.2s
🎯 Action:
do(action=\"Tap\", element=[500, 300])";

        let mut parser = OutputParser::new();
        let (events, _) = feed(&mut parser, output);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, ProgressKind::Thinking);
        assert_eq!(events[1].kind, ProgressKind::Performance);
        assert_eq!(events[1].message, "latency 1.2s");
        assert_eq!(events[2].kind, ProgressKind::Action);
        assert!(events[2].message.starts_with("Tap ("));
    }

    #[test]
    fn test_parsing_action_line_and_takeover() {
        let mut parser = OutputParser::new();

        let parsed = parser.push_line("Parsing action: do(action=\"Back\")");
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].kind, ProgressKind::Action);

        let parsed = parser.push_line("Press Enter after completing manual operation...");
        assert_eq!(parsed.events[0].kind, ProgressKind::Takeover);

        let parsed = parser.push_line("💭 Thinking:");
        assert!(parsed.step_boundary);
    }

    #[test]
    fn test_final_message_falls_back_to_last_line() {
        let mut parser = OutputParser::new();
        parser.push_line("Loading model...");
        parser.push_line("Result: ok");
        assert_eq!(parser.final_message(), Some("Result: ok"));
    }

    #[test]
    fn test_thinking_without_prior_action_is_not_boundary() {
        let mut parser = OutputParser::new();
        assert!(!parser.push_line("💭 思考过程:").step_boundary);
        assert!(!parser.push_line("💭 思考过程:").step_boundary);
    }
}
