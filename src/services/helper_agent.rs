//! Helper-agent verification.
//!
//! When primary validation fails, a second provider invocation is asked to
//! judge the work and emit read-only shell commands that confirm or refute
//! the unmet criteria. The helper runs under its own session so it never
//! pollutes the task's conversational context.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::{HelperConfig, ProviderResult};

use super::command_runner::{CommandOutcome, CommandRunner};
use super::dispatcher::{ProviderDispatcher, SessionHandle};
use super::output_parser::OutputParser;
use super::prompt_builder::PromptBuilder;

/// Directories never enumerated into the helper prompt.
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    ".git",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    ".venv",
];

const MAX_ENUMERATION_DEPTH: usize = 6;

/// What the helper concluded.
#[derive(Debug, Clone)]
pub struct HelperOutcome {
    /// Validation may be marked valid on the helper's authority.
    pub confirmed: bool,
    /// How the verdict was reached, for the audit trail.
    pub verdict_source: HelperVerdictSource,
    pub reasoning: Option<String>,
    pub command_outcomes: Vec<CommandOutcome>,
    /// The helper invocation itself, for session bookkeeping and the
    /// prompt log.
    pub provider_result: ProviderResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperVerdictSource {
    /// The helper asserted validity and no deterministic check was owed.
    SelfJudgement,
    /// Every emitted verification command exited zero.
    CommandsPassed,
    /// At least one verification command failed, or none were emitted.
    CommandsFailed,
}

pub struct HelperAgentDriver {
    config: HelperConfig,
    runner: CommandRunner,
}

impl HelperAgentDriver {
    pub fn new(config: HelperConfig) -> Self {
        let runner = CommandRunner::new(std::time::Duration::from_secs(
            config.command_timeout_secs,
        ));
        Self { config, runner }
    }

    /// The session-map key helper invocations live under, distinct from
    /// the task's own feature key.
    pub fn session_key(feature_id: &str) -> String {
        format!("helper:{feature_id}")
    }

    /// Run the helper for a failed validation.
    ///
    /// `session` is the handle resolved for `helper:<feature_id>`; the
    /// caller records any returned handle back under that key.
    pub async fn verify(
        &self,
        dispatcher: &ProviderDispatcher,
        task_id: &str,
        session: Option<&SessionHandle>,
        agent_response: &str,
        failed_criteria: &[String],
        working_directory: &Path,
    ) -> SupervisorResult<HelperOutcome> {
        let listing = PromptBuilder::sanitize_paths(
            &Self::enumerate_files(working_directory, self.config.max_files),
            working_directory,
        );
        let prompt = PromptBuilder::helper(
            agent_response,
            failed_criteria,
            &listing,
            self.config.response_truncate_chars,
        );

        let outcome = dispatcher
            .dispatch(
                &prompt,
                working_directory,
                self.config.agent_mode.as_deref(),
                session,
                None,
            )
            .await?;

        let Some(parsed) = OutputParser::tolerant_object(&outcome.result.raw_output) else {
            return Err(SupervisorError::HelperAgentFailed(format!(
                "helper response for task {task_id} carried no JSON verdict"
            )));
        };

        let is_valid = parsed
            .get("isValid")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let reasoning = parsed
            .get("reasoning")
            .and_then(Value::as_str)
            .map(str::to_string);
        let commands: Vec<String> = parsed
            .get("verificationCommands")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if is_valid && !self.must_verify_deterministically(task_id) {
            tracing::info!(task_id, "Helper confirmed validity on its own authority");
            return Ok(HelperOutcome {
                confirmed: true,
                verdict_source: HelperVerdictSource::SelfJudgement,
                reasoning,
                command_outcomes: Vec::new(),
                provider_result: outcome.result,
            });
        }

        if commands.is_empty() {
            return Ok(HelperOutcome {
                confirmed: is_valid && !self.config.deterministic,
                verdict_source: if is_valid {
                    HelperVerdictSource::SelfJudgement
                } else {
                    HelperVerdictSource::CommandsFailed
                },
                reasoning,
                command_outcomes: Vec::new(),
                provider_result: outcome.result,
            });
        }

        let (all_passed, command_outcomes) =
            self.runner.run_all(&commands, working_directory).await;
        tracing::info!(
            task_id,
            commands = command_outcomes.len(),
            all_passed,
            "Helper verification commands executed"
        );

        Ok(HelperOutcome {
            confirmed: all_passed,
            verdict_source: if all_passed {
                HelperVerdictSource::CommandsPassed
            } else {
                HelperVerdictSource::CommandsFailed
            },
            reasoning,
            command_outcomes,
            provider_result: outcome.result,
        })
    }

    /// Whether this task's helper verdict must be re-checked by running
    /// the emitted commands: always when determinism is forced, otherwise
    /// for a stable sample of tasks by id hash.
    fn must_verify_deterministically(&self, task_id: &str) -> bool {
        if self.config.deterministic {
            return true;
        }
        if self.config.sampling_percent == 0 {
            return false;
        }
        let digest = Sha256::digest(task_id.as_bytes());
        let bucket = u16::from(digest[0]) % 100;
        bucket < u16::from(self.config.sampling_percent)
    }

    /// Depth-limited enumeration of the working directory, excluding
    /// dependency and build trees, capped at `max_files` entries.
    pub fn enumerate_files(working_directory: &Path, max_files: usize) -> Vec<String> {
        let mut files = Vec::new();
        Self::walk(working_directory, working_directory, 0, max_files, &mut files);
        files.sort();
        files
    }

    fn walk(
        root: &Path,
        dir: &Path,
        depth: usize,
        max_files: usize,
        out: &mut Vec<String>,
    ) {
        if depth > MAX_ENUMERATION_DEPTH || out.len() >= max_files {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(std::fs::DirEntry::file_name);
        for entry in entries {
            if out.len() >= max_files {
                return;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if EXCLUDED_DIRS.contains(&name.as_str()) || name.starts_with('.') {
                    continue;
                }
                Self::walk(root, &path, depth + 1, max_files, out);
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.display().to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(deterministic: bool, sampling_percent: u8) -> HelperAgentDriver {
        HelperAgentDriver::new(HelperConfig {
            deterministic,
            sampling_percent,
            ..HelperConfig::default()
        })
    }

    #[test]
    fn enumeration_skips_dependency_dirs_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/app.ts"), "x").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "x").unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }

        let files = HelperAgentDriver::enumerate_files(dir.path(), 100);
        assert!(files.contains(&"src/app.ts".to_string()));
        assert!(!files.iter().any(|f| f.contains("node_modules")));
        assert!(!files.iter().any(|f| f.contains(".git")));

        let capped = HelperAgentDriver::enumerate_files(dir.path(), 3);
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn deterministic_flag_forces_command_verification() {
        let forced = driver(true, 0);
        assert!(forced.must_verify_deterministically("any-task"));

        let sampled_off = driver(false, 0);
        assert!(!sampled_off.must_verify_deterministically("any-task"));

        let sampled_all = driver(false, 100);
        assert!(sampled_all.must_verify_deterministically("any-task"));
    }

    #[test]
    fn sampling_is_stable_per_task_id() {
        let d = driver(false, 50);
        let first = d.must_verify_deterministically("task-42");
        for _ in 0..10 {
            assert_eq!(d.must_verify_deterministically("task-42"), first);
        }
    }
}
