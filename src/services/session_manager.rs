//! Session continuity across provider invocations.
//!
//! Sessions are keyed by feature id in supervisor state. Resolution
//! prefers an explicit task override, then a healthy active entry, then
//! discovery through the provider's session-listing interface; anything
//! else opens a fresh session.

use chrono::Utc;

use crate::domain::errors::SupervisorResult;
use crate::domain::models::{
    ProviderResult, SessionConfig, SessionInfo, SupervisorState, Task,
};
use crate::domain::ports::Provider;

use super::dispatcher::SessionHandle;

/// Snippet tag providers are asked to include so discovery can correlate
/// sessions back to a feature.
fn feature_tag(feature_id: &str) -> String {
    format!("[Feature: {feature_id}]")
}

/// Ages that disqualify a discovered session outright.
const STALE_AGE_MARKERS: &[&str] = &["month", "year"];

pub struct SessionManager {
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Resolve a session handle for a task about to dispatch on the given
    /// provider.
    pub async fn resolve(
        &self,
        task: &Task,
        state: &SupervisorState,
        provider: &dyn Provider,
        feature_id: &str,
    ) -> SupervisorResult<Option<SessionHandle>> {
        // Explicit override wins verbatim.
        if let Some(ref session_id) = task.meta.session_id {
            return Ok(Some(SessionHandle {
                provider: provider.tag().to_string(),
                session_id: session_id.clone(),
            }));
        }

        if self.config.disable_reuse {
            return Ok(None);
        }

        // Healthy active entry for this feature.
        if let Some(info) = state.supervisor.active_sessions.get(feature_id) {
            if info.provider == provider.tag() {
                let token_cap = self.config.token_cap(&info.provider);
                if info.total_tokens >= token_cap {
                    tracing::info!(
                        feature_id,
                        total_tokens = info.total_tokens,
                        token_cap,
                        "Session dropped: context token cap exceeded"
                    );
                } else if info.error_count >= self.config.error_cap {
                    tracing::info!(
                        feature_id,
                        error_count = info.error_count,
                        "Session dropped: error cap exceeded"
                    );
                } else {
                    return Ok(Some(SessionHandle {
                        provider: info.provider.clone(),
                        session_id: info.session_id.clone(),
                    }));
                }
            }
        }

        // Discovery against the provider's own listing.
        let tag = feature_tag(feature_id);
        match provider.list_sessions().await {
            Ok(listings) => {
                for listing in listings {
                    let stale = STALE_AGE_MARKERS
                        .iter()
                        .any(|m| listing.relative_age.to_lowercase().contains(m));
                    if !stale && listing.snippet.contains(&tag) {
                        tracing::info!(
                            feature_id,
                            session_id = %listing.session_id,
                            "Session discovered via provider listing"
                        );
                        return Ok(Some(SessionHandle {
                            provider: provider.tag().to_string(),
                            session_id: listing.session_id,
                        }));
                    }
                }
            }
            Err(e) => {
                tracing::debug!(feature_id, error = %e, "Session discovery unavailable");
            }
        }

        Ok(None)
    }

    /// Record the session a provider handed back after an invocation.
    ///
    /// Continuing the same session accumulates token usage and resets the
    /// error count on success; a validation failure increments it. A new
    /// session starts its counters over.
    pub fn record(
        &self,
        state: &mut SupervisorState,
        feature_id: &str,
        task_id: &str,
        result: &ProviderResult,
        validation_ok: bool,
    ) {
        let Some(ref session_id) = result.session_id else {
            return;
        };
        let usage_tokens = result.usage.map(|u| u.total()).unwrap_or(0);

        let entry = state
            .supervisor
            .active_sessions
            .entry(feature_id.to_string());
        let info = entry.or_insert_with(|| {
            SessionInfo::new(session_id.clone(), result.provider.clone(), feature_id, task_id)
        });

        let continued = info.session_id == *session_id && info.provider == result.provider;
        if continued {
            info.total_tokens = info.total_tokens.saturating_add(usage_tokens);
            info.error_count = if validation_ok {
                0
            } else {
                info.error_count.saturating_add(1)
            };
        } else {
            info.session_id = session_id.clone();
            info.provider = result.provider.clone();
            info.total_tokens = usage_tokens;
            info.error_count = u32::from(!validation_ok);
        }
        info.last_used = Utc::now();
        info.feature_id = feature_id.to_string();
        info.task_id = task_id.to_string();
    }
}
