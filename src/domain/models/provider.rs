//! Provider-facing domain types.
//!
//! Providers are external coding-agent CLIs invoked as child processes.
//! The supervisor only sees their stdout/stderr/exit code plus an optional
//! resumable session handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Known provider tags, in no particular order.
///
/// The dispatch order comes from the configured priority list, not from
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Cursor,
    Codex,
    Claude,
    Copilot,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Cursor => "cursor",
            Self::Codex => "codex",
            Self::Claude => "claude",
            Self::Copilot => "copilot",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "cursor" => Some(Self::Cursor),
            "codex" => Some(Self::Codex),
            "claude" => Some(Self::Claude),
            "copilot" => Some(Self::Copilot),
            _ => None,
        }
    }

    /// Default dispatch priority when no override is configured.
    pub fn default_priority() -> Vec<String> {
        vec![
            Self::Gemini.as_str().to_string(),
            Self::Cursor.as_str().to_string(),
            Self::Codex.as_str().to_string(),
            Self::Claude.as_str().to_string(),
        ]
    }
}

/// Terminal status of one provider invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// The child exited; output may still fail validation.
    Completed,
    /// The child exited non-zero, or a synthetic failure was produced.
    Failed,
    /// The hard per-invocation timeout expired and the child was killed.
    TimedOut,
}

/// Token usage as reported by a provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Captured outcome of one provider child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    /// Tag of the provider that actually ran.
    pub provider: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Unmodified combined output, as captured.
    pub raw_output: String,
    pub status: InvocationStatus,
    /// Resumable session handle returned by the provider, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProviderResult {
    /// Synthetic failure used when every provider in the chain was skipped
    /// or failed.
    pub fn synthetic_failure(details: impl Into<String>) -> Self {
        Self {
            provider: "none".to_string(),
            stdout: String::new(),
            stderr: details.into(),
            exit_code: None,
            raw_output: String::new(),
            status: InvocationStatus::Failed,
            session_id: None,
            usage: None,
        }
    }

    /// Combined stderr+stdout used for error classification.
    pub fn combined_output(&self) -> String {
        let mut combined = String::with_capacity(self.stderr.len() + self.stdout.len() + 1);
        combined.push_str(&self.stderr);
        if !self.stderr.is_empty() && !self.stdout.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&self.stdout);
        combined
    }

    pub fn is_empty_output(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }

    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Completed && self.exit_code == Some(0)
    }
}

/// Classified provider failure used to trip circuit breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    ResourceExhausted,
    RateLimit,
    QuotaExceeded,
    ApiError,
    AuthFailed,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceExhausted => "resource_exhausted",
            Self::RateLimit => "rate_limit",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ApiError => "api_error",
            Self::AuthFailed => "auth_failed",
        }
    }
}

/// TTL-scoped breaker entry stored per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub provider: String,
    pub triggered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub error_type: String,
}

impl CircuitBreakerStatus {
    pub fn new(provider: impl Into<String>, error_type: ProviderErrorKind, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            provider: provider.into(),
            triggered_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs as i64),
            error_type: error_type.as_str().to_string(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Everything a provider needs for one invocation.
#[derive(Debug, Clone)]
pub struct ProviderInvocation {
    /// Full prompt delivered over stdin.
    pub prompt: String,
    /// Child process CWD; must already exist.
    pub working_directory: PathBuf,
    /// Agent mode flag, provider-specific.
    pub agent_mode: Option<String>,
    /// Resumable session handle, if continuity applies.
    pub session_id: Option<String>,
    /// Hard timeout; the child is killed when it expires.
    pub timeout: Duration,
}

/// One entry from a provider's session-listing interface, used by session
/// discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListing {
    pub session_id: String,
    /// Snippet of the session's opening prompt.
    pub snippet: String,
    /// Human-relative age, e.g. "2 hours ago".
    pub relative_age: String,
}
