//! Supervisor configuration model.
//!
//! Connection parameters come from the CLI (required, env-backed); this
//! model holds the ambient settings merged by the figment loader from
//! defaults, `.foundry/config.yaml`, `.foundry/local.yaml` and `FOUNDRY_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::provider::ProviderKind;

/// Main configuration structure for foundry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Provider dispatch settings.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Global retry policy defaults.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session continuity settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Helper-agent verification settings.
    #[serde(default)]
    pub helper: HelperConfig,

    /// Interrogation round budgets.
    #[serde(default)]
    pub interrogation: InterrogationConfig,

    /// Validation settings.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Resource-exhausted backoff settings.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Goal-completion check toggle.
    #[serde(default)]
    pub goal_check: GoalCheckConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Provider dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProvidersConfig {
    /// Dispatch priority, highest first.
    #[serde(default = "ProviderKind::default_priority")]
    pub priority: Vec<String>,

    /// Hard per-invocation timeout.
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Circuit breaker TTL.
    #[serde(default = "default_breaker_ttl_secs")]
    pub breaker_ttl_secs: u64,

    /// Provider CLI path overrides keyed by tag.
    #[serde(default)]
    pub path_overrides: HashMap<String, String>,
}

const fn default_invocation_timeout_secs() -> u64 {
    1800
}

const fn default_breaker_ttl_secs() -> u64 {
    86_400
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            priority: ProviderKind::default_priority(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            breaker_ttl_secs: default_breaker_ttl_secs(),
            path_overrides: HashMap::new(),
        }
    }
}

/// Retry policy defaults applied when a task does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Default retry budget per task.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Identical validation reasons tolerated before blocking outright.
    #[serde(default = "default_repeated_error_cap")]
    pub repeated_error_cap: u32,
}

const fn default_max_retries() -> u32 {
    1
}

const fn default_repeated_error_cap() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            repeated_error_cap: default_repeated_error_cap(),
        }
    }
}

/// Session continuity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Consecutive validation failures before a session is dropped.
    #[serde(default = "default_session_error_cap")]
    pub error_cap: u32,

    /// Disable reuse entirely; every invocation opens a fresh session.
    #[serde(default)]
    pub disable_reuse: bool,

    /// Per-provider context-token caps.
    #[serde(default = "default_token_caps")]
    pub token_caps: HashMap<String, u64>,
}

const fn default_session_error_cap() -> u32 {
    5
}

fn default_token_caps() -> HashMap<String, u64> {
    HashMap::from([
        ("gemini".to_string(), 350_000),
        ("copilot".to_string(), 350_000),
        ("cursor".to_string(), 250_000),
        ("claude".to_string(), 250_000),
        ("codex".to_string(), 8_000),
    ])
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            error_cap: default_session_error_cap(),
            disable_reuse: false,
            token_caps: default_token_caps(),
        }
    }
}

impl SessionConfig {
    /// Token cap for a provider tag; unknown tags get the tightest cap.
    pub fn token_cap(&self, provider: &str) -> u64 {
        self.token_caps.get(provider).copied().unwrap_or(8_000)
    }
}

/// Helper-agent verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HelperConfig {
    /// Agent mode passed to the helper invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,

    /// Force deterministic command execution over helper self-judgement.
    #[serde(default)]
    pub deterministic: bool,

    /// Percentage of helper confirmations re-checked by command execution.
    #[serde(default = "default_sampling_percent")]
    pub sampling_percent: u8,

    /// Directory-listing cap passed into the helper prompt.
    #[serde(default = "default_helper_max_files")]
    pub max_files: usize,

    /// Truncation applied to the agent response quoted in the prompt.
    #[serde(default = "default_response_truncate_chars")]
    pub response_truncate_chars: usize,

    /// Per-verification-command timeout.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

const fn default_sampling_percent() -> u8 {
    10
}

const fn default_helper_max_files() -> usize {
    100
}

const fn default_response_truncate_chars() -> usize {
    5000
}

const fn default_command_timeout_secs() -> u64 {
    30
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            agent_mode: None,
            deterministic: false,
            sampling_percent: default_sampling_percent(),
            max_files: default_helper_max_files(),
            response_truncate_chars: default_response_truncate_chars(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Interrogation round budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InterrogationConfig {
    /// Rounds allowed during normal attempts.
    #[serde(default = "default_initial_rounds")]
    pub initial_rounds: u32,

    /// Follow-up rounds allowed in the final interrogation after retries
    /// are exhausted.
    #[serde(default)]
    pub final_follow_ups: u32,
}

const fn default_initial_rounds() -> u32 {
    1
}

impl Default for InterrogationConfig {
    fn default() -> Self {
        Self {
            initial_rounds: default_initial_rounds(),
            final_follow_ups: 0,
        }
    }
}

/// Validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// TTL for cached criterion verdicts.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

const fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Resource-exhausted backoff schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackoffConfig {
    /// Delay per attempt, in seconds. After the last entry, hard halt.
    #[serde(default = "default_backoff_schedule")]
    pub schedule_secs: Vec<u64>,
}

fn default_backoff_schedule() -> Vec<u64> {
    vec![60, 300, 1200, 3600, 7200]
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            schedule_secs: default_backoff_schedule(),
        }
    }
}

impl BackoffConfig {
    /// Delay for a 1-based attempt, or None once the schedule is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<u64> {
        self.schedule_secs.get(attempt.saturating_sub(1) as usize).copied()
    }
}

/// Goal-completion check toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GoalCheckConfig {
    /// Dispatch a goal-completion prompt when the queue exhausts with the
    /// goal still incomplete.
    #[serde(default = "default_goal_check_enabled")]
    pub enabled: bool,
}

const fn default_goal_check_enabled() -> bool {
    true
}

impl Default for GoalCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_goal_check_enabled(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for file output; stdout-only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}
