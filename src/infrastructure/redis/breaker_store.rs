//! Redis-backed circuit breaker entries.
//!
//! One `circuit_breaker:<provider>` key per provider in the state
//! database, written with SETEX so entries self-expire. Reads tolerate
//! transient store trouble; a breaker that cannot be read is treated as
//! closed rather than halting dispatch.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::CircuitBreakerStatus;
use crate::domain::ports::BreakerStore;

pub struct RedisBreakerStore {
    con: ConnectionManager,
}

impl RedisBreakerStore {
    pub fn new(con: ConnectionManager) -> Self {
        Self { con }
    }

    fn key(provider: &str) -> String {
        format!("circuit_breaker:{provider}")
    }
}

#[async_trait]
impl BreakerStore for RedisBreakerStore {
    async fn get(&self, provider: &str) -> SupervisorResult<Option<CircuitBreakerStatus>> {
        let mut con = self.con.clone();
        let raw: Option<String> = match con.get(Self::key(provider)).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(provider, error = %e, "Breaker read failed; treating as closed");
                return Ok(None);
            }
        };
        let Some(raw) = raw else { return Ok(None) };
        match serde_json::from_str::<CircuitBreakerStatus>(&raw) {
            Ok(status) if status.is_expired() => {
                // TTL should have removed it; clean up a stale clock skew.
                let _: Result<(), _> = con.del(Self::key(provider)).await;
                Ok(None)
            }
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                tracing::warn!(provider, error = %e, "Breaker entry failed to decode; discarding");
                let _: Result<(), _> = con.del(Self::key(provider)).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, status: &CircuitBreakerStatus, ttl_secs: u64) -> SupervisorResult<()> {
        let payload = serde_json::to_string(status)
            .map_err(|e| SupervisorError::QueueIo(format!("breaker failed to encode: {e}")))?;
        let mut con = self.con.clone();
        con.set_ex::<_, _, ()>(Self::key(&status.provider), payload, ttl_secs)
            .await
            .map_err(|e| SupervisorError::QueueIo(format!("breaker SETEX failed: {e}")))?;
        Ok(())
    }

    async fn delete(&self, provider: &str) -> SupervisorResult<()> {
        let mut con = self.con.clone();
        con.del::<_, ()>(Self::key(provider))
            .await
            .map_err(|e| SupervisorError::QueueIo(format!("breaker DEL failed: {e}")))?;
        Ok(())
    }
}
