//! Append-only audit log.
//!
//! One JSONL file per project at `<sandbox_root>/<project_id>/audit.log.jsonl`.
//! Each line is one event with state digests and truncated prompt/response
//! previews. Lines are written whole in a single append and never
//! rewritten.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::domain::errors::{SupervisorError, SupervisorResult};

const PREVIEW_CHARS: usize = 500;

/// Supervisor events recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    TaskStart,
    TaskComplete,
    TaskBlocked,
    Halt,
    Completed,
    ResourceExhaustedRetry,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStart => "TASK_START",
            Self::TaskComplete => "TASK_COMPLETE",
            Self::TaskBlocked => "TASK_BLOCKED",
            Self::Halt => "HALT",
            Self::Completed => "COMPLETED",
            Self::ResourceExhaustedRetry => "RESOURCE_EXHAUSTED_RETRY",
        }
    }
}

/// One audit line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_after: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invoked: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
}

impl AuditEntry {
    pub fn new(event: AuditEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
            task_id: None,
            state_before: None,
            state_after: None,
            validation_summary: None,
            halt_reason: None,
            tool_invoked: None,
            prompt_preview: None,
            prompt_length: None,
            response_preview: None,
            response_length: None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_states(mut self, before: Value, after: Value) -> Self {
        self.state_before = Some(before);
        self.state_after = Some(after);
        self
    }

    pub fn with_validation(mut self, summary: impl Into<String>) -> Self {
        self.validation_summary = Some(summary.into());
        self
    }

    pub fn with_halt_reason(mut self, reason: impl Into<String>) -> Self {
        self.halt_reason = Some(reason.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool_invoked = Some(tool.into());
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt_length = Some(prompt.len());
        self.prompt_preview = Some(truncate(prompt, PREVIEW_CHARS));
        self
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.response_length = Some(response.len());
        self.response_preview = Some(truncate(response, PREVIEW_CHARS));
        self
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Strip obvious credential material before anything reaches disk.
pub fn scrub_secrets(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(api[_-]?key|token|secret|password|authorization)\b(["']?\s*[:=]\s*)["']?[^\s"',;]+"#)
            .expect("static scrub pattern")
    });
    re.replace_all(s, "$1$2[REDACTED]").into_owned()
}

/// Append-only writer for one project's audit file.
pub struct AuditLogger {
    path: PathBuf,
}

impl AuditLogger {
    /// Logger for a project directory under the sandbox root.
    pub fn for_project(sandbox_root: &Path, project_id: &str) -> Self {
        Self {
            path: sandbox_root.join(project_id).join("audit.log.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line. Never rewrites existing lines.
    pub async fn append(&self, entry: &AuditEntry) -> SupervisorResult<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| SupervisorError::AuditWriteFailed(e.to_string()))?;
        let mut line = scrub_secrets(&json);
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SupervisorError::AuditWriteFailed(e.to_string()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SupervisorError::AuditWriteFailed(e.to_string()))?;
        // One write call per line keeps appends atomic at the fs level.
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SupervisorError::AuditWriteFailed(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SupervisorError::AuditWriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Read all entries back, oldest first. Used by `metrics`.
    pub async fn read_all(&self) -> SupervisorResult<Vec<AuditEntry>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SupervisorError::AuditWriteFailed(e.to_string())),
        };
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
