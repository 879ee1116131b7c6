//! Task domain model.
//!
//! Tasks are discrete units of work handed to an external coding agent.
//! They arrive from the operator (enqueue), execute strictly FIFO, and end
//! up either completed or blocked.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Status of a task in the supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is enqueued, not yet dispatched.
    #[default]
    Pending,
    /// Task has been dequeued and assigned to `current_task`.
    InProgress,
    /// Task completed and its validation report is valid.
    Completed,
    /// Task exhausted its retry budget or hit a repeated identical error.
    Blocked,
    /// Task failed terminally without being blocked.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Blocked | Self::Failed)
    }
}

/// Semantic class of work a task represents.
///
/// Selects the guideline block injected into the initial prompt and gates
/// interrogation (behavioral tasks are never interrogated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Coding,
    Behavioral,
    Configuration,
    Testing,
    Documentation,
    Refactoring,
    Implementation,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Behavioral => "behavioral",
            Self::Configuration => "configuration",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Refactoring => "refactoring",
            Self::Implementation => "implementation",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coding" => Some(Self::Coding),
            "behavioral" => Some(Self::Behavioral),
            "configuration" => Some(Self::Configuration),
            "testing" => Some(Self::Testing),
            "documentation" => Some(Self::Documentation),
            "refactoring" => Some(Self::Refactoring),
            "implementation" => Some(Self::Implementation),
            _ => None,
        }
    }

    /// Behavioral tasks are exempt from interrogation rounds.
    pub fn is_behavioral(&self) -> bool {
        matches!(self, Self::Behavioral)
    }
}

/// Retry policy carried on each task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of fix/clarification re-dispatches after the first
    /// failed attempt.
    pub max_retries: u32,
    /// Optional fixed delay between retry dispatches, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_seconds: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_seconds: None,
        }
    }
}

/// Free-form correlation metadata carried on a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Explicit provider session handle override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Stable feature identifier for session continuity across tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
}

/// A unit of operator-defined work dispatched to an external agent.
///
/// Only `task_id`, `instructions` and `acceptance_criteria` are required on
/// enqueue; everything else defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Operator-assigned unique identifier.
    pub task_id: String,

    /// Short statement of what the task is meant to achieve.
    #[serde(default)]
    pub intent: String,

    /// Preferred provider tag; the dispatcher may fall back along priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Semantic class of work.
    #[serde(default)]
    pub task_type: TaskType,

    /// Verbatim instructions passed into the prompt.
    pub instructions: String,

    /// Acceptance criteria validated after every attempt.
    pub acceptance_criteria: Vec<String>,

    /// Lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,

    /// Retry budget and pacing.
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Explicit working directory; defaults to `<sandbox_root>/<project_id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Agent mode flag passed through to the provider CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,

    /// Paths that must exist under the working directory after the attempt.
    #[serde(default)]
    pub required_artifacts: Vec<String>,

    /// Command run in the working directory when `tests_required` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,

    /// Whether the test command gates validation.
    #[serde(default)]
    pub tests_required: bool,

    /// Structural expectations for the JSON trailer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_json_schema: Option<Value>,

    /// Correlation metadata.
    #[serde(default)]
    pub meta: TaskMeta,
}

impl Task {
    /// Create a minimal task with the required fields only.
    pub fn new(
        task_id: impl Into<String>,
        instructions: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            intent: String::new(),
            tool: None,
            task_type: TaskType::default(),
            instructions: instructions.into(),
            acceptance_criteria,
            status: TaskStatus::default(),
            retry_policy: RetryPolicy::default(),
            working_directory: None,
            agent_mode: None,
            required_artifacts: Vec::new(),
            test_command: None,
            tests_required: false,
            expected_json_schema: None,
            meta: TaskMeta::default(),
        }
    }

    /// Resolve the stable feature identifier used for session continuity.
    ///
    /// Chain: explicit `meta.feature_id`, then a `task:` prefix of the task
    /// id, then `project:<project_id>`, then `"default"`.
    pub fn feature_id(&self, project_id: Option<&str>) -> String {
        if let Some(ref fid) = self.meta.feature_id {
            return fid.clone();
        }
        if let Some(prefix) = self.task_id.split('-').next() {
            if !prefix.is_empty() && prefix != self.task_id {
                return format!("task:{prefix}");
            }
        }
        if let Some(project) = project_id {
            return format!("project:{project}");
        }
        "default".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_task_deserializes_with_defaults() {
        let json = r#"{
            "task_id": "T1",
            "instructions": "create greeting.ts exporting greet",
            "acceptance_criteria": ["function greet exists"]
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.task_id, "T1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.task_type, TaskType::Coding);
        assert_eq!(task.retry_policy.max_retries, 1);
        assert!(task.required_artifacts.is_empty());
        assert!(!task.tests_required);
    }

    #[test]
    fn feature_id_prefers_explicit_meta() {
        let mut task = Task::new("auth-setup-1", "x", vec![]);
        task.meta.feature_id = Some("feature:auth".into());
        assert_eq!(task.feature_id(Some("proj")), "feature:auth");
    }

    #[test]
    fn feature_id_falls_back_to_task_prefix() {
        let task = Task::new("auth-setup-1", "x", vec![]);
        assert_eq!(task.feature_id(Some("proj")), "task:auth");
    }

    #[test]
    fn feature_id_falls_back_to_project_then_default() {
        let task = Task::new("solo", "x", vec![]);
        assert_eq!(task.feature_id(Some("proj")), "project:proj");
        assert_eq!(task.feature_id(None), "default");
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Blocked,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
    }
}
