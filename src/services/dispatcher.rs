//! Provider dispatch with priority fallback.
//!
//! Walks the configured priority, skipping providers with open breakers,
//! and classifies each failure against the provider's error vocabulary.
//! Classified failures trip the breaker and fall through to the next
//! provider; resource exhaustion is returned to the loop instead so the
//! backoff schedule owns the retry, not a day-long breaker.

use std::path::Path;
use std::time::Duration;

use crate::domain::errors::SupervisorResult;
use crate::domain::models::{
    ProviderErrorKind, ProviderInvocation, ProviderResult,
};
use crate::infrastructure::providers::{ProviderRegistry, ProviderSpec};

use super::circuit_breaker::CircuitBreakerService;

/// Outcome of one dispatch across the priority chain.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub result: ProviderResult,
    /// Error classification of the returned result, when it matched the
    /// provider's failure vocabulary.
    pub classified: Option<ProviderErrorKind>,
    /// Every provider in the chain was skipped by an open breaker.
    pub circuit_broken: bool,
}

/// A resumable session scoped to the provider that owns it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub provider: String,
    pub session_id: String,
}

pub struct ProviderDispatcher {
    registry: ProviderRegistry,
    breakers: CircuitBreakerService,
    invocation_timeout: Duration,
}

impl ProviderDispatcher {
    pub fn new(
        registry: ProviderRegistry,
        breakers: CircuitBreakerService,
        invocation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            breakers,
            invocation_timeout,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakerService {
        &self.breakers
    }

    /// Candidate order: the task's preferred tool first when present, then
    /// the configured priority without duplicates.
    fn candidates(&self, preferred: Option<&str>) -> Vec<String> {
        let mut order = Vec::new();
        if let Some(tool) = preferred {
            if self.registry.get(tool).is_some() {
                order.push(tool.to_string());
            }
        }
        for tag in self.registry.priority() {
            if !order.contains(tag) {
                order.push(tag.clone());
            }
        }
        order
    }

    /// Dispatch a prompt across the priority chain.
    pub async fn dispatch(
        &self,
        prompt: &str,
        working_directory: &Path,
        agent_mode: Option<&str>,
        session: Option<&SessionHandle>,
        preferred: Option<&str>,
    ) -> SupervisorResult<DispatchOutcome> {
        let candidates = self.candidates(preferred);
        let mut skipped_by_breaker = 0usize;
        let mut last_failure: Option<ProviderResult> = None;
        let mut last_classified: Option<ProviderErrorKind> = None;

        for tag in &candidates {
            if self.breakers.is_open(tag).await? {
                tracing::debug!(provider = %tag, "Skipping provider with open breaker");
                skipped_by_breaker += 1;
                continue;
            }

            let Some(provider) = self.registry.get(tag) else {
                continue;
            };

            let session_id = session
                .filter(|s| s.provider == *tag)
                .map(|s| s.session_id.clone());

            let invocation = ProviderInvocation {
                prompt: prompt.to_string(),
                working_directory: working_directory.to_path_buf(),
                agent_mode: agent_mode.map(str::to_string),
                session_id,
                timeout: self.invocation_timeout,
            };

            let result = match provider.invoke(invocation).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(provider = %tag, error = %e, "Provider spawn failed; trying next");
                    last_failure = Some(ProviderResult::synthetic_failure(e.to_string()));
                    continue;
                }
            };

            let classified = ProviderSpec::builtin(tag)
                .and_then(|spec| spec.classify(&result.combined_output()));

            match classified {
                Some(ProviderErrorKind::ResourceExhausted) => {
                    // Backoff owns this retry; do not burn a 24h breaker.
                    return Ok(DispatchOutcome {
                        result,
                        classified,
                        circuit_broken: false,
                    });
                }
                Some(kind) => {
                    self.breakers.trip(tag, kind).await?;
                    tracing::warn!(
                        provider = %tag,
                        error_type = kind.as_str(),
                        "Provider failure classified; falling through"
                    );
                    last_failure = Some(result);
                    last_classified = Some(kind);
                    continue;
                }
                None => {
                    return Ok(DispatchOutcome {
                        result,
                        classified: None,
                        circuit_broken: false,
                    });
                }
            }
        }

        if skipped_by_breaker == candidates.len() && !candidates.is_empty() {
            return Ok(DispatchOutcome {
                result: ProviderResult::synthetic_failure(
                    "every provider in the priority chain has an open breaker",
                ),
                classified: None,
                circuit_broken: true,
            });
        }

        // Something was attempted but nothing produced a usable result;
        // fall into the normal validation-failure path.
        Ok(DispatchOutcome {
            result: last_failure.unwrap_or_else(|| {
                ProviderResult::synthetic_failure("no provider produced a result")
            }),
            classified: last_classified,
            circuit_broken: false,
        })
    }
}
