//! Provider session continuity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resumable provider session, keyed by feature id in supervisor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Provider-specific resumable handle.
    pub session_id: String,
    /// Tag of the provider that owns the session.
    pub provider: String,
    pub last_used: DateTime<Utc>,
    /// Consecutive validation failures while on this session.
    pub error_count: u32,
    /// Accumulated token usage across continued invocations.
    pub total_tokens: u64,
    pub feature_id: String,
    /// Task that most recently used the session.
    pub task_id: String,
}

impl SessionInfo {
    pub fn new(
        session_id: impl Into<String>,
        provider: impl Into<String>,
        feature_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            provider: provider.into(),
            last_used: Utc::now(),
            error_count: 0,
            total_tokens: 0,
            feature_id: feature_id.into(),
            task_id: task_id.into(),
        }
    }
}
