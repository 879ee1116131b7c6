//! Provider registry.
//!
//! Binds provider tags to live provider instances and owns the configured
//! dispatch priority. The dispatcher walks the priority and skips tags with
//! open breakers; the registry only answers lookups.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::ProvidersConfig;
use crate::domain::ports::Provider;

use super::cli_provider::CliProvider;
use super::spec::ProviderSpec;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    priority: Vec<String>,
}

impl ProviderRegistry {
    /// Build providers for every tag in the configured priority.
    pub fn from_config(config: &ProvidersConfig) -> SupervisorResult<Self> {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();

        for tag in &config.priority {
            let spec = ProviderSpec::builtin(tag).ok_or_else(|| {
                SupervisorError::ConfigInvalid(format!("unknown provider tag '{tag}'"))
            })?;
            let path_override = config.path_overrides.get(tag).map(String::as_str);
            providers.insert(
                tag.clone(),
                Arc::new(CliProvider::new(spec, path_override)) as Arc<dyn Provider>,
            );
        }

        if providers.is_empty() {
            return Err(SupervisorError::ConfigInvalid(
                "provider priority resolved to no providers".to_string(),
            ));
        }

        Ok(Self {
            providers,
            priority: config.priority.clone(),
        })
    }

    /// Build a registry from pre-constructed providers, in priority order.
    /// Used by tests to inject fakes.
    pub fn from_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        let priority = providers.iter().map(|p| p.tag().to_string()).collect();
        let providers = providers
            .into_iter()
            .map(|p| (p.tag().to_string(), p))
            .collect();
        Self { providers, priority }
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(tag).cloned()
    }

    /// Configured dispatch priority, highest first.
    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// The highest-priority provider; used for goal-completion checks.
    pub fn primary(&self) -> Option<Arc<dyn Provider>> {
        self.priority.first().and_then(|tag| self.get(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_from_default_config() {
        let config = ProvidersConfig::default();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.priority(), ["gemini", "cursor", "codex", "claude"]);
        assert!(registry.get("gemini").is_some());
        assert!(registry.get("cursor").is_some());
        assert!(registry.get("copilot").is_none());
        assert_eq!(registry.primary().unwrap().tag(), "gemini");
    }

    #[test]
    fn unknown_tag_fails_construction() {
        let mut config = ProvidersConfig::default();
        config.priority.push("clippy".to_string());
        assert!(matches!(
            ProviderRegistry::from_config(&config),
            Err(SupervisorError::ConfigInvalid(_))
        ));
    }
}
