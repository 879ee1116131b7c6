//! Per-provider circuit breakers.
//!
//! A breaker is a TTL-scoped entry in the state database. Open means the
//! provider is skipped by dispatch until the entry expires; entries are
//! never half-open, they simply lapse.

use std::sync::Arc;

use crate::domain::errors::SupervisorResult;
use crate::domain::models::{CircuitBreakerStatus, ProviderErrorKind};
use crate::domain::ports::BreakerStore;

pub struct CircuitBreakerService {
    store: Arc<dyn BreakerStore>,
    ttl_secs: u64,
}

impl CircuitBreakerService {
    pub fn new(store: Arc<dyn BreakerStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Whether the provider currently has an open breaker.
    pub async fn is_open(&self, provider: &str) -> SupervisorResult<bool> {
        Ok(self.store.get(provider).await?.is_some())
    }

    /// Open the breaker for a provider after a classified failure.
    pub async fn trip(
        &self,
        provider: &str,
        error_type: ProviderErrorKind,
    ) -> SupervisorResult<CircuitBreakerStatus> {
        let status = CircuitBreakerStatus::new(provider, error_type, self.ttl_secs);
        self.store.put(&status, self.ttl_secs).await?;
        tracing::warn!(
            provider,
            error_type = error_type.as_str(),
            ttl_secs = self.ttl_secs,
            "Circuit breaker tripped"
        );
        Ok(status)
    }

    /// Close the breaker explicitly (operator action).
    pub async fn reset(&self, provider: &str) -> SupervisorResult<()> {
        self.store.delete(provider).await
    }

    /// Current entry, if open.
    pub async fn status(&self, provider: &str) -> SupervisorResult<Option<CircuitBreakerStatus>> {
        self.store.get(provider).await
    }
}
