//! Post-load recovery detection.
//!
//! Runs once at loop start against the freshly loaded state. Classifies
//! crash leftovers into scenarios and maps each to a handler: a clean CLI
//! crash is reissued automatically, anything murkier requires the
//! operator.

use serde::{Deserialize, Serialize};

use crate::domain::models::{ProviderResult, SupervisorState, SupervisorStatus, Task, TaskStatus};

/// Scenario classes the detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryKind {
    CliCrash,
    PartialTask,
    ConflictingState,
}

impl RecoveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CliCrash => "CLI_CRASH",
            Self::PartialTask => "PARTIAL_TASK",
            Self::ConflictingState => "CONFLICTING_STATE",
        }
    }
}

/// What to do about a detected scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Reissue the task without operator input.
    AutoReissue,
    /// Mark blocked and wait for the operator.
    RequireOperator,
}

/// One detected scenario with supporting detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryScenario {
    pub kind: RecoveryKind,
    pub details: String,
}

impl RecoveryScenario {
    pub fn action(&self) -> RecoveryAction {
        match self.kind {
            RecoveryKind::CliCrash => RecoveryAction::AutoReissue,
            RecoveryKind::PartialTask | RecoveryKind::ConflictingState => {
                RecoveryAction::RequireOperator
            }
        }
    }
}

pub struct RecoveryDetector;

impl RecoveryDetector {
    /// Inspect post-load state for crash leftovers.
    pub fn detect(
        state: &SupervisorState,
        last_task: Option<&Task>,
        last_result: Option<&ProviderResult>,
    ) -> Option<RecoveryScenario> {
        if let Some(scenario) = Self::detect_conflicting_state(state) {
            return Some(scenario);
        }
        if let Some(scenario) = Self::detect_cli_crash(state, last_task, last_result) {
            return Some(scenario);
        }
        Self::detect_partial_task(state, last_task)
    }

    fn detect_cli_crash(
        state: &SupervisorState,
        last_task: Option<&Task>,
        last_result: Option<&ProviderResult>,
    ) -> Option<RecoveryScenario> {
        let result = last_result?;
        let nonzero = matches!(result.exit_code, Some(code) if code != 0);
        if !nonzero {
            return None;
        }
        if result.raw_output.trim().is_empty() {
            return Some(RecoveryScenario {
                kind: RecoveryKind::CliCrash,
                details: format!(
                    "provider '{}' exited {:?} with no output",
                    result.provider, result.exit_code
                ),
            });
        }
        if let (Some(task), Some(last_id)) = (last_task, &state.supervisor.last_task_id) {
            if task.task_id == *last_id {
                return Some(RecoveryScenario {
                    kind: RecoveryKind::CliCrash,
                    details: format!(
                        "provider exited {:?} while task {} was current",
                        result.exit_code, task.task_id
                    ),
                });
            }
        }
        None
    }

    fn detect_partial_task(
        state: &SupervisorState,
        last_task: Option<&Task>,
    ) -> Option<RecoveryScenario> {
        if let Some(ref report) = state.last_validation_report {
            if !report.rules_passed.is_empty() && !report.rules_failed.is_empty() {
                return Some(RecoveryScenario {
                    kind: RecoveryKind::PartialTask,
                    details: format!(
                        "validation stopped mid-chain: {} passed, {} failed",
                        report.rules_passed.len(),
                        report.rules_failed.len()
                    ),
                });
            }
        }
        if let Some(task) = last_task {
            let completed = state
                .completed_tasks
                .iter()
                .any(|c| c.task_id == task.task_id);
            if task.status == TaskStatus::InProgress && !completed {
                return Some(RecoveryScenario {
                    kind: RecoveryKind::PartialTask,
                    details: format!("task {} was in progress and never completed", task.task_id),
                });
            }
        }
        None
    }

    fn detect_conflicting_state(state: &SupervisorState) -> Option<RecoveryScenario> {
        if state.supervisor.status == SupervisorStatus::Running
            && state.current_task.is_none()
            && state.queue.exhausted
            && !state.goal.completed
        {
            return Some(RecoveryScenario {
                kind: RecoveryKind::ConflictingState,
                details: "RUNNING with no current task, exhausted queue, incomplete goal"
                    .to_string(),
            });
        }
        if state.supervisor.halt_reason.is_some()
            && state.supervisor.status != SupervisorStatus::Halted
        {
            return Some(RecoveryScenario {
                kind: RecoveryKind::ConflictingState,
                details: format!(
                    "halt reason '{}' recorded while status is {}",
                    state.supervisor.halt_reason.as_deref().unwrap_or(""),
                    state.supervisor.status.as_str()
                ),
            });
        }
        None
    }
}
