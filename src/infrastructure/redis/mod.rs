//! Redis implementations of the persistence ports.

pub mod breaker_store;
pub mod connection;
pub mod state_store;
pub mod task_queue;
pub mod validation_cache;

pub use breaker_store::RedisBreakerStore;
pub use connection::{RedisConnections, RedisSettings};
pub use state_store::RedisStateStore;
pub use task_queue::RedisTaskQueue;
pub use validation_cache::{cache_key, RedisValidationCache};
