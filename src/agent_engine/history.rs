use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::PathBuf;

use crate::agent_engine::command::CommandKind;
use crate::errors::OrdenadorResult;

/// Summary line rendered for an empty log.
pub const FIRST_STEP: &str = "This is the first step.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub command: String,
    pub arguments: Map<String, Value>,
}

impl ActionRecord {
    pub fn new(command: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            command: command.into(),
            arguments,
        }
    }
}

impl From<&CommandKind> for ActionRecord {
    fn from(cmd: &CommandKind) -> Self {
        Self::new(cmd.tag(), cmd.arguments())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HistoryEntry {
    Assistant { action: ActionRecord },
    System { feedback: FeedbackRecord },
}

/// Transcript line written to the session file.
#[derive(Debug, Serialize)]
struct TranscriptLine<'a> {
    ts: i64,
    task: &'a str,
    #[serde(flatten)]
    entry: &'a HistoryEntry,
}

/// Ordered, append-only record of one task's actions and feedback.
pub struct TaskHistory {
    task: String,
    entries: Vec<HistoryEntry>,
    transcript: Option<PathBuf>,
}

impl TaskHistory {
    pub fn new() -> Self {
        Self {
            task: String::new(),
            entries: Vec::new(),
            transcript: None,
        }
    }

    /// Also append every record to `path` as JSONL.
    pub fn with_transcript(path: PathBuf) -> Self {
        Self {
            transcript: Some(path),
            ..Self::new()
        }
    }

    /// Clears all entries and starts a new task.
    pub fn reset(&mut self, task: &str) {
        self.task = task.to_string();
        self.entries.clear();
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_action(&mut self, record: ActionRecord) {
        self.push(HistoryEntry::Assistant { action: record });
    }

    pub fn record_feedback(&mut self, message: impl Into<String>) {
        self.push(HistoryEntry::System {
            feedback: FeedbackRecord {
                message: message.into(),
            },
        });
    }

    /// One line per entry, oldest first.
    pub fn summarize(&self) -> String {
        if self.entries.is_empty() {
            return FIRST_STEP.to_string();
        }

        let mut lines = Vec::with_capacity(self.entries.len() + 1);
        lines.push("History:".to_string());
        for entry in &self.entries {
            match entry {
                HistoryEntry::Assistant { action } => lines.push(format!(
                    "- Action: {} {}",
                    action.command,
                    Value::Object(action.arguments.clone())
                )),
                HistoryEntry::System { feedback } => {
                    lines.push(format!("- Feedback: {}", feedback.message))
                }
            }
        }
        lines.join("\n")
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "history transcript write failed");
        }
    }

    /// Append the latest entry to the JSONL transcript, if one is configured.
    fn flush(&self) -> OrdenadorResult<()> {
        let (Some(path), Some(last)) = (&self.transcript, self.entries.last()) else {
            return Ok(());
        };
        let line = serde_json::to_string(&TranscriptLine {
            ts: chrono::Utc::now().timestamp_millis(),
            task: &self.task,
            entry: last,
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), "history entry flushed");
        Ok(())
    }
}

impl Default for TaskHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// `<data dir>/sessions/session_<id>.jsonl`, creating the directory.
pub fn session_transcript_path(session_id: &str) -> PathBuf {
    let dir = crate::config::data_dir().join("sessions");
    let _ = std::fs::create_dir_all(&dir);
    dir.join(format!("session_{session_id}.jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_renders_first_step_sentinel() {
        let history = TaskHistory::new();
        assert_eq!(history.summarize(), FIRST_STEP);
    }

    #[test]
    fn action_line_contains_command() {
        let mut history = TaskHistory::new();
        history.reset("open the browser");
        history.record_action(ActionRecord::new("X", Map::new()));
        let summary = history.summarize();
        assert!(summary.contains("X"));
        assert!(summary.contains("- Action: X {}"));
    }

    #[test]
    fn summary_preserves_order_and_is_deterministic() {
        let mut history = TaskHistory::new();
        history.reset("task");
        history.record_action(ActionRecord::from(&CommandKind::RequestHigherDetail {
            reason: Some("small text".into()),
        }));
        history.record_feedback("click failed: off screen");
        history.record_action(ActionRecord::from(&CommandKind::TaskComplete { message: None }));

        let summary = history.summarize();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], r#"- Action: request_higher_detail {"reason":"small text"}"#);
        assert_eq!(lines[2], "- Feedback: click failed: off screen");
        assert_eq!(lines[3], "- Action: task_complete {}");
        assert_eq!(summary, history.summarize());
    }

    #[test]
    fn reset_clears_previous_task() {
        let mut history = TaskHistory::new();
        history.reset("first");
        history.record_feedback("boom");
        history.reset("second");
        assert!(history.is_empty());
        assert_eq!(history.task(), "second");
        assert_eq!(history.summarize(), FIRST_STEP);
    }

    #[test]
    fn transcript_gets_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let mut history = TaskHistory::with_transcript(path.clone());
        history.reset("task");
        history.record_feedback("one");
        history.record_action(ActionRecord::new("click", Map::new()));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["role"], "system");
        assert_eq!(first["feedback"]["message"], "one");
        assert_eq!(first["task"], "task");
    }
}
