//! Append-only prompt/response log.
//!
//! Full prompt and response bodies with type tags and invocation
//! metadata, one JSONL file per project under
//! `<sandbox_root>/<project_id>/logs/prompts.log.jsonl`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::domain::errors::{SupervisorError, SupervisorResult};

use super::audit_log::scrub_secrets;

/// Type tags for prompt-log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptLogType {
    Prompt,
    Response,
    FixPrompt,
    ClarificationPrompt,
    InterrogationPrompt,
    InterrogationResponse,
    HelperAgentResponse,
    GoalCompletionCheck,
    GoalCompletionResponse,
}

impl PromptLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "PROMPT",
            Self::Response => "RESPONSE",
            Self::FixPrompt => "FIX_PROMPT",
            Self::ClarificationPrompt => "CLARIFICATION_PROMPT",
            Self::InterrogationPrompt => "INTERROGATION_PROMPT",
            Self::InterrogationResponse => "INTERROGATION_RESPONSE",
            Self::HelperAgentResponse => "HELPER_AGENT_RESPONSE",
            Self::GoalCompletionCheck => "GOAL_COMPLETION_CHECK",
            Self::GoalCompletionResponse => "GOAL_COMPLETION_RESPONSE",
        }
    }
}

/// One prompt-log line: a full body plus invocation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptLogEntry {
    pub timestamp: DateTime<Utc>,
    pub log_type: PromptLogType,
    pub body: String,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl PromptLogEntry {
    pub fn new(log_type: PromptLogType, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            timestamp: Utc::now(),
            log_type,
            length: body.len(),
            body,
            task_id: None,
            working_directory: None,
            agent_mode: None,
            provider: None,
            session_id: None,
            duration_ms: None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_invocation(
        mut self,
        working_directory: &Path,
        provider: Option<&str>,
        session_id: Option<&str>,
        agent_mode: Option<&str>,
    ) -> Self {
        self.working_directory = Some(working_directory.display().to_string());
        self.provider = provider.map(str::to_string);
        self.session_id = session_id.map(str::to_string);
        self.agent_mode = agent_mode.map(str::to_string);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Append-only writer for one project's prompt log.
pub struct PromptLogger {
    path: PathBuf,
}

impl PromptLogger {
    pub fn for_project(sandbox_root: &Path, project_id: &str) -> Self {
        Self {
            path: sandbox_root
                .join(project_id)
                .join("logs")
                .join("prompts.log.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line.
    pub async fn append(&self, entry: &PromptLogEntry) -> SupervisorResult<()> {
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
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SupervisorError::AuditWriteFailed(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SupervisorError::AuditWriteFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_append_under_logs_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logger = PromptLogger::for_project(dir.path(), "proj");

        let entry = PromptLogEntry::new(PromptLogType::Prompt, "full prompt body")
            .with_task("T1")
            .with_invocation(Path::new("/sandbox/proj"), Some("gemini"), Some("s1"), None)
            .with_duration(1234);
        logger.append(&entry).await.unwrap();

        let entry = PromptLogEntry::new(PromptLogType::Response, "full response body");
        logger.append(&entry).await.unwrap();

        assert!(logger.path().ends_with("proj/logs/prompts.log.jsonl"));
        let contents = tokio::fs::read_to_string(logger.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 2);

        let first: PromptLogEntry = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.log_type, PromptLogType::Prompt);
        assert_eq!(first.length, "full prompt body".len());
        assert_eq!(first.provider.as_deref(), Some("gemini"));
        assert_eq!(first.duration_ms, Some(1234));
    }

    #[test]
    fn type_tags_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&PromptLogType::HelperAgentResponse).unwrap(),
            "\"HELPER_AGENT_RESPONSE\""
        );
    }
}
