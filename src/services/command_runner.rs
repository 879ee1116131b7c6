//! Whitelisted read-only verification shell.
//!
//! Helper-agent commands run in the task working directory under a verb
//! whitelist. Pipes between whitelisted verbs are allowed; redirection,
//! command substitution and chaining are not.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// The only verbs a verification command may invoke.
const ALLOWED_VERBS: &[&str] = &[
    "ls", "find", "grep", "cat", "head", "tail", "wc", "file", "stat", "test", "[", "readlink",
    "pwd", "basename", "dirname",
];

/// Shell constructs that would escape read-only execution.
const FORBIDDEN_SEQUENCES: &[&str] = &[";", "&&", "||", ">", "<", "`", "$(", "${", "&", "\n"];

/// Outcome of one executed verification command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Why a command was rejected before execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejection {
    #[error("empty command")]
    Empty,

    #[error("verb '{0}' is not on the read-only whitelist")]
    ForbiddenVerb(String),

    #[error("forbidden shell construct '{0}'")]
    ForbiddenConstruct(String),
}

pub struct CommandRunner {
    per_command_timeout: Duration,
}

impl CommandRunner {
    pub fn new(per_command_timeout: Duration) -> Self {
        Self {
            per_command_timeout,
        }
    }

    /// Validate a command line against the whitelist without running it.
    pub fn validate(command: &str) -> Result<(), CommandRejection> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(CommandRejection::Empty);
        }

        for seq in FORBIDDEN_SEQUENCES {
            if trimmed.contains(seq) {
                return Err(CommandRejection::ForbiddenConstruct((*seq).to_string()));
            }
        }

        // Each pipeline segment must start with a whitelisted verb.
        for segment in trimmed.split('|') {
            let verb = segment
                .trim()
                .split_whitespace()
                .next()
                .ok_or(CommandRejection::Empty)?;
            if !ALLOWED_VERBS.contains(&verb) {
                return Err(CommandRejection::ForbiddenVerb(verb.to_string()));
            }
        }
        Ok(())
    }

    /// Validate and run one command in the working directory.
    ///
    /// Rejected commands are reported as failed outcomes rather than
    /// errors so the aggregate verdict logic stays uniform.
    pub async fn run(&self, command: &str, working_directory: &Path) -> CommandOutcome {
        if let Err(rejection) = Self::validate(command) {
            tracing::warn!(command, %rejection, "Verification command rejected");
            return CommandOutcome {
                command: command.to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: rejection.to_string(),
            };
        }

        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match timeout(self.per_command_timeout, spawned).await {
            Ok(Ok(output)) => CommandOutcome {
                command: command.to_string(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => CommandOutcome {
                command: command.to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: format!("failed to execute: {e}"),
            },
            Err(_) => CommandOutcome {
                command: command.to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: format!(
                    "timed out after {}s",
                    self.per_command_timeout.as_secs()
                ),
            },
        }
    }

    /// Run a batch; the aggregate passes iff every command exits zero.
    pub async fn run_all(
        &self,
        commands: &[String],
        working_directory: &Path,
    ) -> (bool, Vec<CommandOutcome>) {
        let mut outcomes = Vec::with_capacity(commands.len());
        let mut all_passed = !commands.is_empty();
        for command in commands {
            let outcome = self.run(command, working_directory).await;
            if !outcome.passed() {
                all_passed = false;
            }
            outcomes.push(outcome);
        }
        (all_passed, outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelisted_verbs_validate() {
        assert!(CommandRunner::validate("ls -la src").is_ok());
        assert!(CommandRunner::validate("grep -rn \"app.post('/login'\" src").is_ok());
        assert!(CommandRunner::validate("cat package.json | grep express").is_ok());
        assert!(CommandRunner::validate("test -f src/x.ts").is_ok());
        assert!(CommandRunner::validate("[ -d src ]").is_ok());
    }

    #[test]
    fn mutating_verbs_rejected() {
        assert_eq!(
            CommandRunner::validate("rm -rf /"),
            Err(CommandRejection::ForbiddenVerb("rm".to_string()))
        );
        assert_eq!(
            CommandRunner::validate("touch x"),
            Err(CommandRejection::ForbiddenVerb("touch".to_string()))
        );
        assert_eq!(
            CommandRunner::validate("ls | xargs rm"),
            Err(CommandRejection::ForbiddenVerb("xargs".to_string()))
        );
    }

    #[test]
    fn shell_constructs_rejected() {
        assert!(matches!(
            CommandRunner::validate("cat x > y"),
            Err(CommandRejection::ForbiddenConstruct(_))
        ));
        assert!(matches!(
            CommandRunner::validate("ls; rm x"),
            Err(CommandRejection::ForbiddenConstruct(_))
        ));
        assert!(matches!(
            CommandRunner::validate("cat $(find .)"),
            Err(CommandRejection::ForbiddenConstruct(_))
        ));
        assert!(matches!(
            CommandRunner::validate("ls && cat x"),
            Err(CommandRejection::ForbiddenConstruct(_))
        ));
    }

    #[tokio::test]
    async fn commands_run_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "hello").unwrap();

        let runner = CommandRunner::new(Duration::from_secs(5));
        let outcome = runner.run("test -f present.txt", dir.path()).await;
        assert!(outcome.passed());

        let outcome = runner.run("test -f absent.txt", dir.path()).await;
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn rejected_command_is_a_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));
        let outcome = runner.run("rm -rf .", dir.path()).await;
        assert!(!outcome.passed());
        assert!(outcome.stderr.contains("whitelist"));
    }

    #[tokio::test]
    async fn aggregate_requires_every_command_to_pass() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));

        let (ok, outcomes) = runner
            .run_all(
                &["test -f a.txt".to_string(), "test -f b.txt".to_string()],
                dir.path(),
            )
            .await;
        assert!(!ok);
        assert_eq!(outcomes.len(), 2);

        let (ok, _) = runner
            .run_all(&["test -f a.txt".to_string()], dir.path())
            .await;
        assert!(ok);

        let (ok, _) = runner.run_all(&[], dir.path()).await;
        assert!(!ok);
    }
}
