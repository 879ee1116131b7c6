//! Batched interrogation of unresolved criteria.
//!
//! One prompt per round lists everything still unresolved and demands a
//! strict JSON verdict per criterion. Responses are verified
//! deterministically: a criterion only resolves when every file it claims
//! actually exists under the sandbox root.

use serde_json::Value;
use std::path::{Component, Path};

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::{ProviderResult, Task};

use super::dispatcher::{ProviderDispatcher, SessionHandle};
use super::output_parser::OutputParser;
use super::prompt_builder::PromptBuilder;

/// Result of an interrogation run.
#[derive(Debug, Clone)]
pub struct InterrogationOutcome {
    /// Every criterion resolved as COMPLETE with its files present.
    pub all_criteria_satisfied: bool,
    /// Criteria confirmed complete with evidence on disk.
    pub resolved: Vec<String>,
    /// Criteria still unresolved when rounds ran out.
    pub remaining: Vec<String>,
    /// Criteria the agent declared INCOMPLETE or NOT_STARTED; out of the
    /// question rotation but still unmet.
    pub dropped: Vec<String>,
    /// Provider exchanges, one per round, for the prompt log.
    pub exchanges: Vec<InterrogationExchange>,
}

#[derive(Debug, Clone)]
pub struct InterrogationExchange {
    pub prompt: String,
    pub result: ProviderResult,
}

/// Per-criterion verdict parsed from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CriterionStatus {
    Complete,
    Incomplete,
    NotStarted,
    Unknown,
}

impl CriterionStatus {
    fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "COMPLETE" => Self::Complete,
            "INCOMPLETE" => Self::Incomplete,
            "NOT_STARTED" => Self::NotStarted,
            _ => Self::Unknown,
        }
    }
}

pub struct Interrogator;

impl Interrogator {
    /// Run up to `rounds` interrogation rounds over the unresolved set.
    pub async fn interrogate(
        dispatcher: &ProviderDispatcher,
        task: &Task,
        unresolved: Vec<String>,
        rounds: u32,
        session: Option<&SessionHandle>,
        working_directory: &Path,
        sandbox_root: &Path,
    ) -> SupervisorResult<InterrogationOutcome> {
        let mut remaining = unresolved;
        let mut resolved = Vec::new();
        let mut dropped = Vec::new();
        let mut exchanges = Vec::new();

        for round in 0..rounds {
            if remaining.is_empty() {
                break;
            }

            let prompt = PromptBuilder::interrogation(task, &remaining);
            let outcome = dispatcher
                .dispatch(&prompt, working_directory, None, session, None)
                .await?;

            let Some(parsed) = OutputParser::tolerant_object(&outcome.result.raw_output) else {
                exchanges.push(InterrogationExchange {
                    prompt,
                    result: outcome.result,
                });
                return Err(SupervisorError::InterrogationFailed(format!(
                    "round {} response carried no JSON for task {}",
                    round + 1,
                    task.task_id
                )));
            };

            let results = parsed
                .get("results")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let mut next_round = Vec::new();
            for criterion in remaining {
                let verdict = results.get(&criterion);
                let status = verdict
                    .and_then(|v| v.get("status"))
                    .and_then(Value::as_str)
                    .map(CriterionStatus::parse)
                    .unwrap_or(CriterionStatus::Unknown);
                let file_paths: Vec<String> = verdict
                    .and_then(|v| v.get("file_paths"))
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                match status {
                    CriterionStatus::Complete => {
                        if Self::files_exist(&file_paths, working_directory, sandbox_root) {
                            resolved.push(criterion);
                        } else {
                            // Claimed complete without evidence; retained.
                            tracing::debug!(
                                criterion = %criterion,
                                "COMPLETE claim without files on disk; downgraded"
                            );
                            next_round.push(criterion);
                        }
                    }
                    // Explicitly not done: out of the rotation, still unmet.
                    CriterionStatus::Incomplete | CriterionStatus::NotStarted => {
                        tracing::debug!(criterion = %criterion, "Criterion declared unimplemented");
                        dropped.push(criterion);
                    }
                    CriterionStatus::Unknown => next_round.push(criterion),
                }
            }

            exchanges.push(InterrogationExchange {
                prompt,
                result: outcome.result,
            });
            remaining = next_round;
        }

        Ok(InterrogationOutcome {
            all_criteria_satisfied: remaining.is_empty() && dropped.is_empty(),
            resolved,
            remaining,
            dropped,
            exchanges,
        })
    }

    /// Deterministic verification: a non-empty declaration whose every
    /// path exists under the sandbox.
    fn files_exist(paths: &[String], working_directory: &Path, sandbox_root: &Path) -> bool {
        if paths.is_empty() {
            return false;
        }
        paths.iter().all(|p| {
            let path = Path::new(p);
            if path.components().any(|c| matches!(c, Component::ParentDir)) || p.starts_with('~')
            {
                return false;
            }
            if path.is_absolute() {
                return path.starts_with(sandbox_root) && path.exists();
            }
            working_directory.join(path).exists()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_exist_requires_presence_under_sandbox() {
        let sandbox = tempfile::tempdir().unwrap();
        let working = sandbox.path().join("proj");
        std::fs::create_dir_all(&working).unwrap();
        std::fs::write(working.join("a.ts"), "x").unwrap();

        assert!(Interrogator::files_exist(
            &["a.ts".to_string()],
            &working,
            sandbox.path()
        ));
        assert!(!Interrogator::files_exist(
            &["missing.ts".to_string()],
            &working,
            sandbox.path()
        ));
        assert!(!Interrogator::files_exist(&[], &working, sandbox.path()));
        assert!(!Interrogator::files_exist(
            &["../outside.ts".to_string()],
            &working,
            sandbox.path()
        ));
        assert!(!Interrogator::files_exist(
            &["/etc/passwd".to_string()],
            &working,
            sandbox.path()
        ));

        // Absolute paths inside the sandbox are acceptable.
        let absolute = working.join("a.ts").display().to_string();
        assert!(Interrogator::files_exist(
            &[absolute],
            &working,
            sandbox.path()
        ));
    }

    #[test]
    fn criterion_status_parses_case_insensitively() {
        assert_eq!(
            CriterionStatus::parse("complete"),
            CriterionStatus::Complete
        );
        assert_eq!(
            CriterionStatus::parse("NOT_STARTED"),
            CriterionStatus::NotStarted
        );
        assert_eq!(CriterionStatus::parse("weird"), CriterionStatus::Unknown);
    }
}
