//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure
//! concerns.

pub mod config;
pub mod halt;
pub mod provider;
pub mod session;
pub mod state;
pub mod task;
pub mod validation;

pub use config::{
    BackoffConfig, Config, GoalCheckConfig, HelperConfig, InterrogationConfig, LoggingConfig,
    ProvidersConfig, RetryConfig, SessionConfig, ValidationConfig,
};
pub use halt::HaltReason;
pub use provider::{
    CircuitBreakerStatus, InvocationStatus, ProviderErrorKind, ProviderInvocation, ProviderKind,
    ProviderResult, SessionListing, TokenUsage,
};
pub use session::SessionInfo;
pub use state::{
    BlockedTask, CompletedTask, ExecutionMode, Goal, QueueState, ResourceExhaustedRetry,
    SupervisorCore, SupervisorState, SupervisorStatus, TaskAttemptState, COMPLETED_TASKS_CAP,
};
pub use task::{RetryPolicy, Task, TaskMeta, TaskStatus, TaskType};
pub use validation::{CachedCriterion, Confidence, MatchQuality, ValidationReport};
