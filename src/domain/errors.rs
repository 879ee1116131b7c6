//! Error taxonomy for the foundry supervisor.
//!
//! Kinds mirror the propagation policy: validation-layer failures are
//! recovered locally by the control loop (retry, clarification, block),
//! state-layer failures are fatal and halt the process.

use thiserror::Error;

/// Errors that can occur anywhere in the supervisor core.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("State not found under the configured key")]
    StateNotFound,

    #[error("State already initialized under the configured key")]
    StateExists,

    #[error("State blob failed to decode: {0}")]
    StateCorrupt(String),

    #[error("State persist failed: {0}")]
    StatePersistFailed(String),

    #[error("Required state field missing: {0}")]
    MissingStateField(String),

    #[error("Queue I/O failed: {0}")]
    QueueIo(String),

    #[error("Failed to spawn provider '{provider}': {details}")]
    ProviderSpawnFailed { provider: String, details: String },

    #[error("Provider '{provider}' timed out after {timeout_secs}s")]
    ProviderTimeout { provider: String, timeout_secs: u64 },

    #[error("Provider '{0}' reported resource exhaustion")]
    ProviderResourceExhausted(String),

    #[error("Provider '{0}' authentication failed")]
    ProviderAuthFailed(String),

    #[error("Agent output format invalid: {0}")]
    OutputFormatInvalid(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Helper agent failed: {0}")]
    HelperAgentFailed(String),

    #[error("Interrogation failed: {0}")]
    InterrogationFailed(String),

    #[error("Recovery conflict: {0}")]
    RecoveryConflict(String),

    #[error("Path escapes the sandbox root: {0}")]
    SandboxEscape(String),

    #[error("Audit log write failed: {0}")]
    AuditWriteFailed(String),

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),
}

/// Convenience alias used throughout the crate.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

impl SupervisorError {
    /// Whether this error must halt the control loop rather than be
    /// absorbed into retry/clarification/block handling.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StateNotFound
                | Self::StateExists
                | Self::StateCorrupt(_)
                | Self::StatePersistFailed(_)
                | Self::MissingStateField(_)
                | Self::RecoveryConflict(_)
                | Self::SandboxEscape(_)
                | Self::ConfigInvalid(_)
        )
    }

    /// Short machine-readable kind tag used in halt details and audit entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateNotFound => "STATE_NOT_FOUND",
            Self::StateExists => "STATE_EXISTS",
            Self::StateCorrupt(_) => "STATE_CORRUPT",
            Self::StatePersistFailed(_) => "STATE_PERSIST_FAILED",
            Self::MissingStateField(_) => "MISSING_STATE_FIELD",
            Self::QueueIo(_) => "QUEUE_IO_FAILED",
            Self::ProviderSpawnFailed { .. } => "PROVIDER_SPAWN_FAILED",
            Self::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            Self::ProviderResourceExhausted(_) => "PROVIDER_RESOURCE_EXHAUSTED",
            Self::ProviderAuthFailed(_) => "PROVIDER_AUTH_FAILED",
            Self::OutputFormatInvalid(_) => "OUTPUT_FORMAT_INVALID",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::HelperAgentFailed(_) => "HELPER_AGENT_FAILED",
            Self::InterrogationFailed(_) => "INTERROGATION_FAILED",
            Self::RecoveryConflict(_) => "RECOVERY_CONFLICT",
            Self::SandboxEscape(_) => "SANDBOX_ESCAPE",
            Self::AuditWriteFailed(_) => "AUDIT_WRITE_FAILED",
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
        }
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        Self::StateCorrupt(err.to_string())
    }
}
