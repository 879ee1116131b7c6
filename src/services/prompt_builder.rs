//! Deterministic prompt assembly.
//!
//! Prompts are verbatim concatenations of labeled sections. Nothing is
//! paraphrased: instructions and acceptance criteria flow through exactly
//! as the operator wrote them. Context is a minimal, task-filtered state
//! snapshot, never the full blob.

use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;

use crate::domain::models::{SupervisorState, Task, TaskType, ValidationReport};

/// Fixed rules block included in every initial prompt.
const RULES_BLOCK: &str = "\
- Use only the information provided in this prompt. Do not speculate.
- Do not use absolute paths. All paths are relative to the working directory.
- Verify a file exists before modifying it.
- Ask at most one clarifying question, and only if you cannot proceed at all.";

/// Output requirements block mandating the JSON trailer.
const OUTPUT_REQUIREMENTS_BLOCK: &str = "\
End your response with exactly one JSON object and nothing after it:
```json
{
  \"status\": \"completed\" | \"failed\",
  \"files_created\": [\"<relative path>\", ...],
  \"files_updated\": [\"<relative path>\", ...],
  \"changes\": [\"<relative path>\", ...],
  \"neededChanges\": true | false,
  \"summary\": \"<one paragraph describing what was done>\"
}
```
Any text after the closing fence invalidates the response.";

/// Words forbidden in clarified responses.
const FORBIDDEN_HEDGES: &[&str] = &["maybe", "could", "suggest", "recommend", "alternative", "option"];

/// Minimal state snapshot serialized into the READ-ONLY CONTEXT section.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateSnapshot {
    pub project: ProjectContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<GoalContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_task_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub recent_completed_tasks: Vec<CompletedContext>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub blocked_tasks: Vec<BlockedContext>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectContext {
    pub id: String,
    pub sandbox_root: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalContext {
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedContext {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedContext {
    pub task_id: String,
    pub reason: String,
}

pub struct PromptBuilder;

impl PromptBuilder {
    /// Initial prompt for a fresh dispatch.
    pub fn initial(task: &Task, snapshot: &StateSnapshot, working_directory: &Path) -> String {
        let mut p = String::new();
        let _ = writeln!(p, "## Task ID\n{}\n", task.task_id);
        let _ = writeln!(p, "## Task Description\n{}\n", task.instructions);
        if !task.intent.is_empty() {
            let _ = writeln!(p, "## Intent\n{}\n", task.intent);
        }
        let _ = writeln!(p, "## Acceptance Criteria");
        for criterion in &task.acceptance_criteria {
            let _ = writeln!(p, "- {criterion}");
        }
        p.push('\n');
        let _ = writeln!(p, "## Rules\n{RULES_BLOCK}\n");
        let _ = writeln!(p, "## Guidelines\n{}\n", Self::guidelines(task));
        let _ = writeln!(
            p,
            "## READ-ONLY CONTEXT\n{}\n",
            Self::snapshot_json(snapshot)
        );
        let _ = writeln!(p, "## Output Requirements\n{OUTPUT_REQUIREMENTS_BLOCK}\n");
        let _ = write!(p, "Working directory: {}", working_directory.display());
        p
    }

    /// Fix prompt after a failed validation. `strict` prepends the
    /// different-approach directive used after repeated identical errors.
    pub fn fix(
        task: &Task,
        report: &ValidationReport,
        snapshot: &StateSnapshot,
        strict: bool,
    ) -> String {
        let mut p = String::new();
        if strict {
            let _ = writeln!(
                p,
                "STRICT MODE: your previous approach failed repeatedly with the same error. \
                 You must take a different approach this time. Do not repeat the prior attempt.\n"
            );
        }
        let _ = writeln!(p, "## Task ID\n{}\n", task.task_id);
        let _ = writeln!(p, "## Validation Results");
        if let Some(ref reason) = report.reason {
            let _ = writeln!(p, "Reason: {reason}");
        }
        if !report.rules_failed.is_empty() {
            let _ = writeln!(p, "Rules failed: {}", report.rules_failed.join(", "));
        }
        if !report.failed_criteria.is_empty() {
            let _ = writeln!(p, "Unmet criteria:");
            for criterion in &report.failed_criteria {
                let _ = writeln!(p, "- {criterion}");
            }
        }
        if !report.uncertain_criteria.is_empty() {
            let _ = writeln!(p, "Unverified criteria:");
            for criterion in &report.uncertain_criteria {
                let _ = writeln!(p, "- {criterion}");
            }
        }
        p.push('\n');
        let _ = writeln!(
            p,
            "Fix only the issues listed above. Do not rework anything that already passed.\n"
        );
        let _ = writeln!(p, "## Guidelines\n{}\n", Self::guidelines(task));
        let _ = writeln!(
            p,
            "## READ-ONLY CONTEXT\n{}\n",
            Self::snapshot_json(snapshot)
        );
        let _ = write!(p, "## Output Requirements\n{OUTPUT_REQUIREMENTS_BLOCK}");
        p
    }

    /// Clarification prompt after a question or hedged response.
    pub fn clarification(task: &Task, agent_output: &str, snapshot: &StateSnapshot) -> String {
        let mut p = String::new();
        let _ = writeln!(p, "## Task ID\n{}\n", task.task_id);
        let _ = writeln!(
            p,
            "Your previous response was not declarative. Complete the task now and \
             state exactly what you did.\n"
        );
        let _ = writeln!(p, "## Previous Response (for reference)\n{agent_output}\n");
        let _ = writeln!(
            p,
            "Respond in declarative language only. The following words are forbidden: {}.\n",
            FORBIDDEN_HEDGES.join(", ")
        );
        let _ = writeln!(p, "Do not ask questions. Do not offer alternatives.\n");
        let _ = writeln!(
            p,
            "## READ-ONLY CONTEXT\n{}\n",
            Self::snapshot_json(snapshot)
        );
        let _ = write!(p, "## Output Requirements\n{OUTPUT_REQUIREMENTS_BLOCK}");
        p
    }

    /// Goal-completion check prompt dispatched when the queue exhausts.
    pub fn goal_check(goal_description: &str, snapshot: &StateSnapshot) -> String {
        let mut p = String::new();
        let _ = writeln!(p, "## Goal\n{goal_description}\n");
        let _ = writeln!(
            p,
            "## Context\n{}\n",
            Self::snapshot_json(snapshot)
        );
        let _ = write!(
            p,
            "The task queue is empty. Judge whether the goal above is fully achieved \
             based only on the context provided. Respond with exactly one JSON object:\n\
             ```json\n{{\"goal_completed\": true | false, \"reasoning\": \"<why>\"}}\n```"
        );
        p
    }

    /// Helper-agent prompt: synthesize read-only verification commands.
    pub fn helper(
        agent_response: &str,
        failed_criteria: &[String],
        file_listing: &[String],
        truncate_chars: usize,
    ) -> String {
        let truncated: String = agent_response.chars().take(truncate_chars).collect();
        let mut p = String::new();
        let _ = writeln!(
            p,
            "You are verifying another agent's work. Automated validation could not \
             confirm the criteria below.\n"
        );
        let _ = writeln!(p, "## Agent Response (truncated)\n{truncated}\n");
        let _ = writeln!(p, "## Unconfirmed Criteria");
        for criterion in failed_criteria {
            let _ = writeln!(p, "- {criterion}");
        }
        p.push('\n');
        let _ = writeln!(p, "## Files In Working Directory");
        for file in file_listing {
            let _ = writeln!(p, "- {file}");
        }
        p.push('\n');
        let _ = write!(
            p,
            "## Rules\n\
             - You may only use these read-only commands: ls, find, grep, cat, head, tail, \
             wc, file, stat, test, [, readlink, pwd, basename, dirname.\n\
             - Commands run in the working directory. Use relative paths.\n\
             - A command exiting zero confirms its criterion; non-zero refutes it.\n\n\
             Respond with exactly one JSON object:\n\
             ```json\n{{\"isValid\": true | false, \"verificationCommands\": [\"<command>\", ...], \"reasoning\": \"<optional>\"}}\n```"
        );
        p
    }

    /// Interrogation prompt over the currently unresolved criteria.
    pub fn interrogation(task: &Task, unresolved: &[String]) -> String {
        let mut p = String::new();
        let _ = writeln!(p, "## Task ID\n{}\n", task.task_id);
        let _ = writeln!(
            p,
            "For each criterion below, state its true implementation status. \
             Answer from the actual files on disk, not from intent.\n"
        );
        let _ = writeln!(p, "## Criteria");
        for criterion in unresolved {
            let _ = writeln!(p, "- {criterion}");
        }
        p.push('\n');
        let _ = write!(
            p,
            "Respond with exactly one JSON object keyed by the criterion text verbatim:\n\
             ```json\n{{\"results\": {{\"<criterion>\": {{\"status\": \"COMPLETE\" | \"INCOMPLETE\" | \"NOT_STARTED\", \
             \"file_paths\": [\"<relative path>\", ...], \"evidence_snippet\": \"<optional>\"}}}}}}\n```"
        );
        p
    }

    /// Build the task-filtered minimal snapshot.
    ///
    /// Selection rules:
    /// - project id and sandbox root always;
    /// - goal iff the task text mentions "goal" or the id carries a
    ///   `goal-` prefix;
    /// - last task id iff the task references previous/earlier work;
    /// - up to 5 recent completions iff the task extends previous work and
    ///   is not documentation;
    /// - blocked tasks iff the task mentions unblocking.
    pub fn snapshot(
        task: &Task,
        state: &SupervisorState,
        project_id: &str,
        sandbox_root: &Path,
    ) -> StateSnapshot {
        let haystack = format!(
            "{} {} {}",
            task.instructions.to_lowercase(),
            task.intent.to_lowercase(),
            task.acceptance_criteria.join(" ").to_lowercase()
        );

        let mut snapshot = StateSnapshot {
            project: ProjectContext {
                id: project_id.to_string(),
                sandbox_root: sandbox_root.display().to_string(),
            },
            ..StateSnapshot::default()
        };

        if haystack.contains("goal") || task.task_id.starts_with("goal-") {
            snapshot.goal = Some(GoalContext {
                description: state.goal.description.clone(),
                completed: state.goal.completed,
            });
        }

        let references_previous = ["previous", "last task", "earlier", "after", "before"]
            .iter()
            .any(|kw| haystack.contains(kw));
        if references_previous {
            snapshot.last_task_id = state.supervisor.last_task_id.clone();
        }

        let extends_previous = ["extend", "extending", "building on", "builds on"]
            .iter()
            .any(|kw| haystack.contains(kw));
        if extends_previous && task.task_type != TaskType::Documentation {
            snapshot.recent_completed_tasks = state
                .completed_tasks
                .iter()
                .rev()
                .take(5)
                .map(|c| CompletedContext {
                    task_id: c.task_id.clone(),
                    summary: c.summary.clone(),
                })
                .collect();
        }

        if haystack.contains("unblock") || haystack.contains("blocked") {
            snapshot.blocked_tasks = state
                .blocked_tasks
                .iter()
                .map(|b| BlockedContext {
                    task_id: b.task_id.clone(),
                    reason: b.reason.clone(),
                })
                .collect();
        }

        snapshot
    }

    /// Filter a path list down to sandbox-safe relative paths that exist.
    ///
    /// Absolute paths, traversal, and home-relative paths are dropped
    /// before anything is mentioned in a prompt.
    pub fn sanitize_paths(paths: &[String], sandbox_root: &Path) -> Vec<String> {
        paths
            .iter()
            .filter(|p| {
                let path = Path::new(p.as_str());
                !path.is_absolute()
                    && !p.starts_with('~')
                    && !path.components().any(|c| matches!(c, std::path::Component::ParentDir))
                    && sandbox_root.join(path).exists()
            })
            .cloned()
            .collect()
    }

    /// Guideline block selected by task-type detection over the
    /// instruction and intent keywords, falling back to the declared type.
    fn guidelines(task: &Task) -> &'static str {
        match Self::detect_task_type(task) {
            TaskType::Configuration => {
                "Change configuration files only. Preserve unrelated keys and formatting. \
                 Never commit secrets into configuration."
            }
            TaskType::Testing => {
                "Write tests that exercise observable behavior. Every acceptance criterion \
                 needs at least one assertion. Do not modify production code to make tests pass."
            }
            TaskType::Documentation => {
                "Write documentation for the code as it exists now. Do not change code. \
                 Keep examples runnable."
            }
            TaskType::Refactoring => {
                "Preserve behavior exactly. Keep the public surface stable unless a criterion \
                 says otherwise. Run existing tests to confirm nothing regressed."
            }
            TaskType::Behavioral => {
                "Follow the stated behavior precisely. Do not add features beyond the criteria."
            }
            TaskType::Implementation | TaskType::Coding => {
                "Implement exactly what the criteria describe. Create files under the working \
                 directory only. Keep changes minimal and self-contained."
            }
        }
    }

    /// Keyword detection across instructions and intent; the declared task
    /// type is the fallback.
    fn detect_task_type(task: &Task) -> TaskType {
        let haystack = format!(
            "{} {}",
            task.instructions.to_lowercase(),
            task.intent.to_lowercase()
        );
        let rules: &[(&[&str], TaskType)] = &[
            (&["config", "configure", "settings", "environment variable"], TaskType::Configuration),
            (&["test", "spec", "coverage"], TaskType::Testing),
            (&["document", "readme", "docs", "comment"], TaskType::Documentation),
            (&["refactor", "restructure", "clean up", "rename"], TaskType::Refactoring),
            (&["behavior", "behaviour", "should respond", "must return"], TaskType::Behavioral),
            (&["implement", "create", "add", "build"], TaskType::Implementation),
        ];
        for (keywords, task_type) in rules {
            if keywords.iter().any(|kw| haystack.contains(kw)) {
                return *task_type;
            }
        }
        task.task_type
    }

    fn snapshot_json(snapshot: &StateSnapshot) -> String {
        serde_json::to_value(snapshot)
            .map(|v: Value| serde_json::to_string_pretty(&v).unwrap_or_else(|_| "{}".to_string()))
            .unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CompletedTask, Confidence, ExecutionMode};
    use chrono::Utc;

    fn state_with_history() -> SupervisorState {
        let mut state = SupervisorState::new(ExecutionMode::Auto);
        state.goal.description = "Ship the auth feature".to_string();
        state.supervisor.last_task_id = Some("auth-1".to_string());
        for i in 0..8 {
            state.record_completed(CompletedTask {
                task_id: format!("T{i}"),
                completed_at: Utc::now(),
                validation_report: ValidationReport::valid_with(vec![], Confidence::High),
                intent: None,
                summary: Some(format!("did thing {i}")),
                requires_context: None,
            });
        }
        state.record_blocked("B1", "artifact missing");
        state
    }

    #[test]
    fn initial_prompt_contains_verbatim_sections() {
        let task = Task::new(
            "T1",
            "create greeting.ts exporting greet",
            vec!["function greet exists".to_string()],
        );
        let snapshot = StateSnapshot::default();
        let prompt = PromptBuilder::initial(&task, &snapshot, Path::new("/sandbox/default"));

        assert!(prompt.contains("## Task ID\nT1"));
        assert!(prompt.contains("create greeting.ts exporting greet"));
        assert!(prompt.contains("- function greet exists"));
        assert!(prompt.contains("## Rules"));
        assert!(prompt.contains("## READ-ONLY CONTEXT"));
        assert!(prompt.contains("neededChanges"));
        assert!(prompt.contains("Working directory: /sandbox/default"));
    }

    #[test]
    fn snapshot_always_has_project_only_by_default() {
        let task = Task::new("T1", "create a widget", vec![]);
        let state = state_with_history();
        let snapshot = PromptBuilder::snapshot(&task, &state, "proj", Path::new("/sandbox"));
        assert_eq!(snapshot.project.id, "proj");
        assert!(snapshot.goal.is_none());
        assert!(snapshot.last_task_id.is_none());
        assert!(snapshot.recent_completed_tasks.is_empty());
        assert!(snapshot.blocked_tasks.is_empty());
    }

    #[test]
    fn snapshot_includes_goal_on_mention_or_prefix() {
        let state = state_with_history();
        let task = Task::new("T2", "work toward the goal", vec![]);
        let snapshot = PromptBuilder::snapshot(&task, &state, "proj", Path::new("/sandbox"));
        assert!(snapshot.goal.is_some());

        let task = Task::new("goal-check", "anything", vec![]);
        let snapshot = PromptBuilder::snapshot(&task, &state, "proj", Path::new("/sandbox"));
        assert!(snapshot.goal.is_some());
    }

    #[test]
    fn snapshot_includes_last_task_on_reference() {
        let state = state_with_history();
        let task = Task::new("T3", "continue from the previous step", vec![]);
        let snapshot = PromptBuilder::snapshot(&task, &state, "proj", Path::new("/sandbox"));
        assert_eq!(snapshot.last_task_id.as_deref(), Some("auth-1"));
    }

    #[test]
    fn snapshot_includes_recent_completions_when_extending() {
        let state = state_with_history();
        let task = Task::new("T4", "extending the earlier work, add pagination", vec![]);
        let snapshot = PromptBuilder::snapshot(&task, &state, "proj", Path::new("/sandbox"));
        assert_eq!(snapshot.recent_completed_tasks.len(), 5);
        // Most recent first.
        assert_eq!(snapshot.recent_completed_tasks[0].task_id, "T7");
    }

    #[test]
    fn documentation_tasks_never_get_completion_history() {
        let state = state_with_history();
        let mut task = Task::new("T5", "extending the docs", vec![]);
        task.task_type = TaskType::Documentation;
        // "docs" keyword routes detection to Documentation as well.
        let snapshot = PromptBuilder::snapshot(&task, &state, "proj", Path::new("/sandbox"));
        assert!(snapshot.recent_completed_tasks.is_empty());
    }

    #[test]
    fn snapshot_includes_blocked_on_unblock_mention() {
        let state = state_with_history();
        let task = Task::new("T6", "unblock the stalled work", vec![]);
        let snapshot = PromptBuilder::snapshot(&task, &state, "proj", Path::new("/sandbox"));
        assert_eq!(snapshot.blocked_tasks.len(), 1);
        assert_eq!(snapshot.blocked_tasks[0].task_id, "B1");
    }

    #[test]
    fn sanitize_paths_drops_escapes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.ts"), "x").unwrap();
        let paths = vec![
            "ok.ts".to_string(),
            "/etc/passwd".to_string(),
            "../escape.ts".to_string(),
            "~/home.ts".to_string(),
            "missing.ts".to_string(),
        ];
        let safe = PromptBuilder::sanitize_paths(&paths, dir.path());
        assert_eq!(safe, vec!["ok.ts".to_string()]);
    }

    #[test]
    fn strict_fix_prompt_prepends_directive() {
        let task = Task::new("T1", "x", vec![]);
        let report = ValidationReport::invalid("required artifact missing: src/x.ts", "artifacts");
        let prompt = PromptBuilder::fix(&task, &report, &StateSnapshot::default(), true);
        assert!(prompt.starts_with("STRICT MODE"));
        assert!(prompt.contains("required artifact missing: src/x.ts"));

        let relaxed = PromptBuilder::fix(&task, &report, &StateSnapshot::default(), false);
        assert!(!relaxed.starts_with("STRICT MODE"));
    }

    #[test]
    fn clarification_prompt_forbids_hedges() {
        let task = Task::new("T1", "x", vec![]);
        let prompt =
            PromptBuilder::clarification(&task, "Maybe we could do it", &StateSnapshot::default());
        for word in FORBIDDEN_HEDGES {
            assert!(prompt.contains(word));
        }
        assert!(prompt.contains("Do not ask questions"));
    }

    #[test]
    fn task_type_detection_prefers_keywords() {
        let task = Task::new("T1", "refactor the session layer", vec![]);
        assert_eq!(PromptBuilder::detect_task_type(&task), TaskType::Refactoring);

        let mut task = Task::new("T2", "do the thing", vec![]);
        task.task_type = TaskType::Behavioral;
        assert_eq!(PromptBuilder::detect_task_type(&task), TaskType::Behavioral);
    }

    #[test]
    fn interrogation_prompt_lists_criteria_verbatim() {
        let task = Task::new("T1", "x", vec![]);
        let unresolved = vec!["endpoint /login exists".to_string()];
        let prompt = PromptBuilder::interrogation(&task, &unresolved);
        assert!(prompt.contains("- endpoint /login exists"));
        assert!(prompt.contains("NOT_STARTED"));
    }
}
