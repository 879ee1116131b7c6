//! The single persisted supervisor state blob.
//!
//! One JSON document holds everything the control loop needs to survive a
//! process crash: the supervisor status and counters, the goal, the current
//! and retry tasks, bounded completion history, blocked tasks, session
//! handles, and per-task attempt bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::session::SessionInfo;
use super::task::Task;
use super::validation::ValidationReport;

/// Completed-task history is trimmed to this many entries in memory; the
/// full history lives only in the append-only audit log.
pub const COMPLETED_TASKS_CAP: usize = 100;

/// Top-level status of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorStatus {
    Running,
    Halted,
    Completed,
}

impl SupervisorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Halted => "HALTED",
            Self::Completed => "COMPLETED",
        }
    }
}

/// Whether the loop runs unattended or pauses for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    Auto,
    Manual,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AUTO" => Some(Self::Auto),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Operator-defined goal the task list is meant to achieve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

/// Queue-side flags mirrored into state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Set when a dequeue found the queue empty.
    pub exhausted: bool,
}

/// Per-task attempt bookkeeping.
///
/// Replaces the dynamic `retry_count_<id>`-style key convention with an
/// explicit nested map keyed by task id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAttemptState {
    /// Fix/clarification re-dispatches consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Attempt numbers for which an interrogation round already ran.
    #[serde(default)]
    pub interrogation_attempts_done: Vec<u32>,
    /// Validation reason from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Consecutive attempts that produced an identical reason.
    #[serde(default)]
    pub repeated_error_count: u32,
}

/// Persistent backoff schedule entry after a resource-exhausted signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceExhaustedRetry {
    /// 1-based attempt number; strictly increases until the cap.
    pub attempt: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
}

/// Supervisor-owned counters and control fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorCore {
    pub status: SupervisorStatus,
    #[serde(default)]
    pub iteration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_details: Option<String>,
    /// A failed task stored so it preempts the next dequeue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_task: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_exhausted_retry: Option<ResourceExhaustedRetry>,
    /// Resumable provider sessions keyed by feature id.
    #[serde(default)]
    pub active_sessions: HashMap<String, SessionInfo>,
    /// Attempt bookkeeping keyed by task id.
    #[serde(default)]
    pub per_task: HashMap<String, TaskAttemptState>,
}

impl Default for SupervisorCore {
    fn default() -> Self {
        Self {
            status: SupervisorStatus::Running,
            iteration: 0,
            last_task_id: None,
            halt_reason: None,
            halt_details: None,
            retry_task: None,
            resource_exhausted_retry: None,
            active_sessions: HashMap::new(),
            per_task: HashMap::new(),
        }
    }
}

/// History record of one completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task_id: String,
    pub completed_at: DateTime<Utc>,
    pub validation_report: ValidationReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_context: Option<bool>,
}

/// Record of one blocked task with the reason it was blocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: String,
    pub blocked_at: DateTime<Utc>,
    pub reason: String,
}

/// The single persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorState {
    pub supervisor: SupervisorCore,
    pub goal: Goal,
    pub queue: QueueState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<Task>,
    #[serde(default)]
    pub completed_tasks: Vec<CompletedTask>,
    #[serde(default)]
    pub blocked_tasks: Vec<BlockedTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validation_report: Option<ValidationReport>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

impl SupervisorState {
    /// Fresh state as written by operator init.
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            supervisor: SupervisorCore::default(),
            goal: Goal::default(),
            queue: QueueState::default(),
            current_task: None,
            completed_tasks: Vec::new(),
            blocked_tasks: Vec::new(),
            last_validation_report: None,
            last_updated: Utc::now(),
            execution_mode,
        }
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.status == SupervisorStatus::Running
    }

    /// Mutable attempt bookkeeping for a task, created on first touch.
    pub fn attempt_state_mut(&mut self, task_id: &str) -> &mut TaskAttemptState {
        self.supervisor
            .per_task
            .entry(task_id.to_string())
            .or_default()
    }

    pub fn attempt_state(&self, task_id: &str) -> Option<&TaskAttemptState> {
        self.supervisor.per_task.get(task_id)
    }

    /// Append a completion record, trimming history to the in-memory cap.
    pub fn record_completed(&mut self, record: CompletedTask) {
        self.completed_tasks.push(record);
        if self.completed_tasks.len() > COMPLETED_TASKS_CAP {
            let excess = self.completed_tasks.len() - COMPLETED_TASKS_CAP;
            self.completed_tasks.drain(..excess);
        }
    }

    /// Append a blocked record.
    pub fn record_blocked(&mut self, task_id: impl Into<String>, reason: impl Into<String>) {
        self.blocked_tasks.push(BlockedTask {
            task_id: task_id.into(),
            blocked_at: Utc::now(),
            reason: reason.into(),
        });
    }

    /// Transition to HALTED with a recorded reason. Never auto-resumed.
    pub fn halt(&mut self, reason: impl Into<String>, details: impl Into<String>) {
        self.supervisor.status = SupervisorStatus::Halted;
        self.supervisor.halt_reason = Some(reason.into());
        self.supervisor.halt_details = Some(details.into());
    }

    /// Operator resume: back to RUNNING with halt fields cleared and the
    /// queue-exhausted flag reset.
    pub fn resume(&mut self) {
        self.supervisor.status = SupervisorStatus::Running;
        self.supervisor.halt_reason = None;
        self.supervisor.halt_details = None;
        self.queue.exhausted = false;
    }

    /// Whether a task id is currently tracked anywhere in state.
    ///
    /// Used to uphold the one-place-at-a-time invariant in tests and
    /// recovery checks.
    pub fn tracks_task(&self, task_id: &str) -> bool {
        self.current_task
            .as_ref()
            .is_some_and(|t| t.task_id == task_id)
            || self
                .supervisor
                .retry_task
                .as_ref()
                .is_some_and(|t| t.task_id == task_id)
            || self.completed_tasks.iter().any(|c| c.task_id == task_id)
            || self.blocked_tasks.iter().any(|b| b.task_id == task_id)
    }

    /// Validate the presence of required top-level fields after decode.
    ///
    /// serde guarantees structure for well-typed blobs; this guards against
    /// blobs hand-edited into a decodable-but-hollow shape.
    pub fn validate_required_fields(value: &serde_json::Value) -> Result<(), String> {
        let obj = value.as_object().ok_or("state root is not an object")?;
        for field in ["supervisor", "goal", "queue"] {
            if !obj.contains_key(field) {
                return Err(field.to_string());
            }
        }
        let supervisor = obj
            .get("supervisor")
            .and_then(|s| s.as_object())
            .ok_or("supervisor")?;
        if !supervisor.contains_key("status") {
            return Err("supervisor.status".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::validation::{Confidence, ValidationReport};

    fn completed(task_id: &str) -> CompletedTask {
        CompletedTask {
            task_id: task_id.to_string(),
            completed_at: Utc::now(),
            validation_report: ValidationReport::valid_with(vec![], Confidence::High),
            intent: None,
            summary: None,
            requires_context: None,
        }
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = SupervisorState::new(ExecutionMode::Auto);
        state.goal.description = "Implement greet".to_string();
        state.attempt_state_mut("T1").retry_count = 2;
        state
            .supervisor
            .active_sessions
            .insert("task:auth".into(), SessionInfo::new("s1", "gemini", "task:auth", "auth-1"));

        let json = serde_json::to_string(&state).unwrap();
        let restored: SupervisorState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn completed_history_trims_to_cap() {
        let mut state = SupervisorState::new(ExecutionMode::Auto);
        for i in 0..(COMPLETED_TASKS_CAP + 25) {
            state.record_completed(completed(&format!("T{i}")));
        }
        assert_eq!(state.completed_tasks.len(), COMPLETED_TASKS_CAP);
        // Oldest entries were dropped, newest retained.
        assert_eq!(state.completed_tasks.last().unwrap().task_id, "T124");
        assert_eq!(state.completed_tasks.first().unwrap().task_id, "T25");
    }

    #[test]
    fn halt_then_resume_clears_fields() {
        let mut state = SupervisorState::new(ExecutionMode::Auto);
        state.queue.exhausted = true;
        state.halt("TASK_LIST_EXHAUSTED_GOAL_INCOMPLETE", "no tasks remain");
        assert_eq!(state.supervisor.status, SupervisorStatus::Halted);
        assert!(state.supervisor.halt_reason.is_some());

        state.resume();
        assert!(state.is_running());
        assert!(state.supervisor.halt_reason.is_none());
        assert!(state.supervisor.halt_details.is_none());
        assert!(!state.queue.exhausted);
    }

    #[test]
    fn required_field_validation_rejects_hollow_blobs() {
        let ok = serde_json::json!({
            "supervisor": {"status": "RUNNING"},
            "goal": {"description": "", "completed": false},
            "queue": {"exhausted": false}
        });
        assert!(SupervisorState::validate_required_fields(&ok).is_ok());

        let missing_goal = serde_json::json!({
            "supervisor": {"status": "RUNNING"},
            "queue": {"exhausted": false}
        });
        assert_eq!(
            SupervisorState::validate_required_fields(&missing_goal),
            Err("goal".to_string())
        );

        let missing_status = serde_json::json!({
            "supervisor": {},
            "goal": {},
            "queue": {}
        });
        assert_eq!(
            SupervisorState::validate_required_fields(&missing_status),
            Err("supervisor.status".to_string())
        );
    }

    #[test]
    fn tracks_task_sees_all_holding_places() {
        let mut state = SupervisorState::new(ExecutionMode::Auto);
        assert!(!state.tracks_task("T1"));
        state.current_task = Some(Task::new("T1", "x", vec![]));
        assert!(state.tracks_task("T1"));
        state.current_task = None;
        state.record_blocked("T1", "repeated error");
        assert!(state.tracks_task("T1"));
    }
}
