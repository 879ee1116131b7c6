use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Provider priority cannot be empty")]
    EmptyPriority,

    #[error("Unknown provider in priority list: {0}")]
    UnknownProvider(String),

    #[error("Invalid invocation timeout: {0}. Must be positive")]
    InvalidTimeout(u64),

    #[error("Invalid breaker TTL: {0}. Must be positive")]
    InvalidBreakerTtl(u64),

    #[error("Invalid helper sampling percent: {0}. Must be 0-100")]
    InvalidSamplingPercent(u8),

    #[error("Backoff schedule cannot be empty")]
    EmptyBackoffSchedule,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .foundry/config.yaml (project config, created by init-state)
    /// 3. .foundry/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FOUNDRY_* prefix)
    /// 5. Specifically recognized operator env vars (highest priority)
    pub fn load() -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".foundry/config.yaml"))
            .merge(Yaml::file(".foundry/local.yaml"))
            .merge(Env::prefixed("FOUNDRY_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::apply_recognized_env(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, skipping the project tree.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::apply_recognized_env(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    /// Apply the operator env vars recognized outside the FOUNDRY_ prefix.
    ///
    /// These are the knobs operators set on shared CI machines without a
    /// config file: provider priority and CLI paths, breaker TTL, helper
    /// behavior, session reuse and the goal-completion check.
    fn apply_recognized_env(config: &mut Config) {
        if let Ok(priority) = std::env::var("CLI_PROVIDER_PRIORITY") {
            let parsed: Vec<String> = priority
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.providers.priority = parsed;
            }
        }

        for tag in ["gemini", "cursor", "codex", "claude", "copilot"] {
            let var = format!("CLI_{}_PATH", tag.to_uppercase());
            if let Ok(path) = std::env::var(&var) {
                if !path.is_empty() {
                    config
                        .providers
                        .path_overrides
                        .insert(tag.to_string(), path);
                }
            }
        }

        if let Some(ttl) = read_env_u64("CIRCUIT_BREAKER_TTL_SECS") {
            config.providers.breaker_ttl_secs = ttl;
        }

        if let Ok(mode) = std::env::var("HELPER_AGENT_MODE") {
            if !mode.is_empty() {
                config.helper.agent_mode = Some(mode);
            }
        }
        if let Some(flag) = read_env_bool("HELPER_DETERMINISTIC") {
            config.helper.deterministic = flag;
        }
        if let Some(percent) = read_env_u64("HELPER_SAMPLING_PERCENT") {
            config.helper.sampling_percent = percent.min(100) as u8;
        }

        if let Some(flag) = read_env_bool("DISABLE_SESSION_REUSE") {
            config.session.disable_reuse = flag;
        }
        if let Some(flag) = read_env_bool("GOAL_COMPLETION_CHECK") {
            config.goal_check.enabled = flag;
        }
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.providers.priority.is_empty() {
            return Err(ConfigError::EmptyPriority);
        }

        for tag in &config.providers.priority {
            if crate::domain::models::ProviderKind::from_str(tag).is_none() {
                return Err(ConfigError::UnknownProvider(tag.clone()));
            }
        }

        if config.providers.invocation_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(
                config.providers.invocation_timeout_secs,
            ));
        }

        if config.providers.breaker_ttl_secs == 0 {
            return Err(ConfigError::InvalidBreakerTtl(
                config.providers.breaker_ttl_secs,
            ));
        }

        if config.helper.sampling_percent > 100 {
            return Err(ConfigError::InvalidSamplingPercent(
                config.helper.sampling_percent,
            ));
        }

        if config.backoff.schedule_secs.is_empty() {
            return Err(ConfigError::EmptyBackoffSchedule);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

fn read_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok()?.trim().parse().ok()
}

fn read_env_bool(var: &str) -> Option<bool> {
    match std::env::var(var).ok()?.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
