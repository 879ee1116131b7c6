//! Ports for the infrastructure layer.
//!
//! Each trait is implemented once against Redis or the provider CLIs and
//! once as an in-memory fake for tests. The control loop depends only on
//! these contracts.

use async_trait::async_trait;
use serde_json::Value;

use super::errors::SupervisorResult;
use super::models::{
    CachedCriterion, CircuitBreakerStatus, ProviderInvocation, ProviderResult, SessionListing,
    SupervisorState, Task,
};

/// Single-key, full-overwrite persistence for the supervisor state blob.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the full blob. Fails with `StateNotFound` when the key is
    /// absent and `StateCorrupt` when it does not decode.
    async fn load(&self) -> SupervisorResult<SupervisorState>;

    /// Overwrite the full blob. Refreshes `last_updated` before writing.
    /// Failure is `StatePersistFailed` and fatal to the loop.
    async fn persist(&self, state: &mut SupervisorState) -> SupervisorResult<()>;

    /// Write the initial blob; fails with `StateExists` if the key is
    /// already present.
    async fn init(&self, state: &mut SupervisorState) -> SupervisorResult<()>;

    /// Explicit operator deletion.
    async fn delete(&self) -> SupervisorResult<()>;
}

/// FIFO task queue over a list primitive.
///
/// Ordering guarantee: for any two enqueue calls A then B, dequeue returns
/// A before B. No deduplication.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &Task) -> SupervisorResult<()>;

    async fn dequeue(&self) -> SupervisorResult<Option<Task>>;

    /// Inspect up to `n` tasks from the head without removing them.
    async fn peek(&self, n: usize) -> SupervisorResult<Vec<Task>>;

    async fn len(&self) -> SupervisorResult<usize>;

    /// Merge a JSON object patch onto the first task with a matching id.
    /// O(N) scan and overwrite. Returns false when no task matched.
    async fn update_in_place(&self, task_id: &str, patch: &Value) -> SupervisorResult<bool>;

    /// Remove the first task with a matching id. Returns false when no
    /// task matched.
    async fn remove(&self, task_id: &str) -> SupervisorResult<bool>;

    /// Delete every queued task, returning how many were dropped.
    async fn drain(&self) -> SupervisorResult<u64>;
}

/// TTL-scoped circuit breaker entries keyed by provider tag.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    /// Current entry, if present and unexpired. Expired entries are
    /// lazily discarded on read.
    async fn get(&self, provider: &str) -> SupervisorResult<Option<CircuitBreakerStatus>>;

    /// Write an entry with the given TTL in seconds (SETEX semantics).
    async fn put(&self, status: &CircuitBreakerStatus, ttl_secs: u64) -> SupervisorResult<()>;

    async fn delete(&self, provider: &str) -> SupervisorResult<()>;
}

/// Cached per-criterion validation verdicts.
#[async_trait]
pub trait ValidationCache: Send + Sync {
    async fn get(&self, key: &str) -> SupervisorResult<Option<CachedCriterion>>;

    async fn put(
        &self,
        key: &str,
        value: &CachedCriterion,
        ttl_secs: u64,
    ) -> SupervisorResult<()>;
}

/// An external coding-agent CLI.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable tag, e.g. "gemini".
    fn tag(&self) -> &str;

    /// Run one invocation to completion under the hard timeout.
    async fn invoke(&self, invocation: ProviderInvocation) -> SupervisorResult<ProviderResult>;

    /// Query the provider's session-listing interface for discovery.
    /// Providers without one return an empty list.
    async fn list_sessions(&self) -> SupervisorResult<Vec<SessionListing>>;
}

/// Structural inspection of a source file, implemented per language.
///
/// Adapters are bound by file extension through a registry; files no
/// adapter supports fall back to regex matching capped at LOW confidence.
pub trait AstInspector: Send + Sync {
    /// Extensions (without dot) this inspector understands.
    fn extensions(&self) -> &[&str];

    fn has_function(&self, source: &str, name: &str) -> bool;

    fn has_class(&self, source: &str, name: &str) -> bool;

    fn has_export(&self, source: &str, name: &str) -> bool;

    fn has_method(&self, source: &str, class_name: &str, method_name: &str) -> bool;

    fn has_decorator(&self, source: &str, name: &str) -> bool;
}
