//! Generic subprocess provider.
//!
//! Shells out to a coding-agent CLI with the prompt on stdin and the task
//! working directory as CWD. The supervisor treats the child as opaque:
//! stdout, stderr, exit code, and an optional session handle are all that
//! come back.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::{
    InvocationStatus, ProviderInvocation, ProviderResult, SessionListing, TokenUsage,
};
use crate::domain::ports::Provider;

use super::spec::ProviderSpec;

/// One provider CLI, parameterized by its invocation conventions.
pub struct CliProvider {
    spec: ProviderSpec,
    binary: String,
}

impl CliProvider {
    /// Create a provider from its spec, honoring a path override.
    pub fn new(spec: ProviderSpec, path_override: Option<&str>) -> Self {
        let binary = path_override
            .map(str::to_string)
            .unwrap_or_else(|| spec.binary.clone());
        Self { spec, binary }
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn build_command(&self, invocation: &ProviderInvocation) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&invocation.working_directory);
        cmd.args(&self.spec.base_args);

        if let (Some(flag), Some(mode)) = (&self.spec.agent_mode_flag, &invocation.agent_mode) {
            cmd.arg(flag).arg(mode);
        }
        if let (Some(flag), Some(session)) = (&self.spec.resume_flag, &invocation.session_id) {
            cmd.arg(flag).arg(session);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Pull a resumable session handle out of the child's stdout, if the
    /// provider emitted structured output carrying one.
    fn extract_session_id(stdout: &str) -> Option<String> {
        let value: Value = serde_json::from_str(stdout.trim()).ok()?;
        for key in ["session_id", "sessionId", "conversation_id"] {
            if let Some(id) = value.get(key).and_then(Value::as_str) {
                return Some(id.to_string());
            }
        }
        None
    }

    /// Pull token usage out of structured stdout, when present.
    fn extract_usage(stdout: &str) -> Option<TokenUsage> {
        let value: Value = serde_json::from_str(stdout.trim()).ok()?;
        let usage = value.get("usage")?;
        Some(TokenUsage {
            input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: usage
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }
}

#[async_trait]
impl Provider for CliProvider {
    fn tag(&self) -> &str {
        &self.spec.tag
    }

    async fn invoke(&self, invocation: ProviderInvocation) -> SupervisorResult<ProviderResult> {
        let mut cmd = self.build_command(&invocation);

        tracing::info!(
            provider = %self.spec.tag,
            binary = %self.binary,
            working_dir = %invocation.working_directory.display(),
            session = invocation.session_id.as_deref().unwrap_or("<fresh>"),
            prompt_length = invocation.prompt.len(),
            "Invoking provider CLI"
        );

        let mut child = cmd.spawn().map_err(|e| SupervisorError::ProviderSpawnFailed {
            provider: self.spec.tag.clone(),
            details: e.to_string(),
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::ProviderSpawnFailed {
                provider: self.spec.tag.clone(),
                details: "failed to acquire stdin handle".to_string(),
            })?;

        stdin
            .write_all(invocation.prompt.as_bytes())
            .await
            .map_err(|e| SupervisorError::ProviderSpawnFailed {
                provider: self.spec.tag.clone(),
                details: format!("failed to deliver prompt: {e}"),
            })?;
        // Close stdin so the child sees end of input.
        drop(stdin);

        let timeout_secs = invocation.timeout.as_secs();
        let waited = timeout(invocation.timeout, child.wait_with_output()).await;

        match waited {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let exit_code = output.status.code();
                let status = if output.status.success() {
                    InvocationStatus::Completed
                } else {
                    InvocationStatus::Failed
                };

                tracing::info!(
                    provider = %self.spec.tag,
                    exit_code = ?exit_code,
                    stdout_length = stdout.len(),
                    stderr_length = stderr.len(),
                    "Provider CLI completed"
                );

                let mut raw_output = stdout.clone();
                if !stderr.is_empty() {
                    if !raw_output.is_empty() {
                        raw_output.push('\n');
                    }
                    raw_output.push_str(&stderr);
                }

                Ok(ProviderResult {
                    provider: self.spec.tag.clone(),
                    session_id: Self::extract_session_id(&stdout),
                    usage: Self::extract_usage(&stdout),
                    stdout,
                    stderr,
                    exit_code,
                    raw_output,
                    status,
                })
            }
            Ok(Err(e)) => Err(SupervisorError::ProviderSpawnFailed {
                provider: self.spec.tag.clone(),
                details: format!("failed to collect output: {e}"),
            }),
            Err(_) => {
                tracing::error!(
                    provider = %self.spec.tag,
                    timeout_secs,
                    "Provider CLI timed out; child killed"
                );
                // kill_on_drop reaps the child when `waited` dropped it.
                Ok(ProviderResult {
                    provider: self.spec.tag.clone(),
                    stdout: String::new(),
                    stderr: format!("invocation timed out after {timeout_secs}s"),
                    exit_code: None,
                    raw_output: String::new(),
                    status: InvocationStatus::TimedOut,
                    session_id: None,
                    usage: None,
                })
            }
        }
    }

    async fn list_sessions(&self) -> SupervisorResult<Vec<SessionListing>> {
        let Some(ref args) = self.spec.session_list_args else {
            return Ok(Vec::new());
        };

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| SupervisorError::ProviderSpawnFailed {
                provider: self.spec.tag.clone(),
                details: format!("session listing failed: {e}"),
            })?;

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Ok(value) = serde_json::from_str::<Value>(stdout.trim()) else {
            return Ok(Vec::new());
        };
        let Some(entries) = value.as_array() else {
            return Ok(Vec::new());
        };

        let listings = entries
            .iter()
            .filter_map(|entry| {
                let session_id = entry
                    .get("session_id")
                    .or_else(|| entry.get("id"))
                    .and_then(Value::as_str)?;
                let snippet = entry
                    .get("snippet")
                    .or_else(|| entry.get("title"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let relative_age = entry
                    .get("relative_age")
                    .or_else(|| entry.get("age"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(SessionListing {
                    session_id: session_id.to_string(),
                    snippet: snippet.to_string(),
                    relative_age: relative_age.to_string(),
                })
            })
            .collect();
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_extracted_from_structured_stdout() {
        let stdout = r#"{"session_id": "abc-123", "result": "done"}"#;
        assert_eq!(
            CliProvider::extract_session_id(stdout),
            Some("abc-123".to_string())
        );
        assert_eq!(CliProvider::extract_session_id("plain text output"), None);
    }

    #[test]
    fn usage_extracted_when_present() {
        let stdout = r#"{"usage": {"input_tokens": 1200, "output_tokens": 300}}"#;
        let usage = CliProvider::extract_usage(stdout).unwrap();
        assert_eq!(usage.input_tokens, 1200);
        assert_eq!(usage.output_tokens, 300);
        assert_eq!(usage.total(), 1500);
    }

    #[test]
    fn path_override_replaces_binary() {
        let spec = ProviderSpec::builtin("gemini").unwrap();
        let provider = CliProvider::new(spec, Some("/opt/bin/gemini"));
        assert_eq!(provider.binary, "/opt/bin/gemini");
        assert_eq!(provider.tag(), "gemini");
    }
}
