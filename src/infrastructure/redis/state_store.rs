//! Redis-backed state store.
//!
//! One key holds the full serialized blob; every write is a single
//! full-overwrite SET. No partial updates, no scripting, no pub/sub.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::SupervisorState;
use crate::domain::ports::StateStore;

/// Single-key state persistence in the state database.
pub struct RedisStateStore {
    con: ConnectionManager,
    state_key: String,
}

impl RedisStateStore {
    pub fn new(con: ConnectionManager, state_key: impl Into<String>) -> Self {
        Self {
            con,
            state_key: state_key.into(),
        }
    }

    fn decode(&self, raw: &str) -> SupervisorResult<SupervisorState> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| SupervisorError::StateCorrupt(e.to_string()))?;
        SupervisorState::validate_required_fields(&value)
            .map_err(SupervisorError::MissingStateField)?;
        serde_json::from_value(value).map_err(|e| SupervisorError::StateCorrupt(e.to_string()))
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn load(&self) -> SupervisorResult<SupervisorState> {
        let mut con = self.con.clone();
        let raw: Option<String> = con
            .get(&self.state_key)
            .await
            .map_err(|e| SupervisorError::QueueIo(format!("state GET failed: {e}")))?;
        match raw {
            Some(blob) => self.decode(&blob),
            None => Err(SupervisorError::StateNotFound),
        }
    }

    async fn persist(&self, state: &mut SupervisorState) -> SupervisorResult<()> {
        state.last_updated = Utc::now();
        let blob = serde_json::to_string(state)
            .map_err(|e| SupervisorError::StatePersistFailed(e.to_string()))?;
        let mut con = self.con.clone();
        con.set::<_, _, ()>(&self.state_key, blob)
            .await
            .map_err(|e| SupervisorError::StatePersistFailed(e.to_string()))?;
        tracing::debug!(
            state_key = %self.state_key,
            iteration = state.supervisor.iteration,
            status = state.supervisor.status.as_str(),
            "State persisted"
        );
        Ok(())
    }

    async fn init(&self, state: &mut SupervisorState) -> SupervisorResult<()> {
        state.last_updated = Utc::now();
        let blob = serde_json::to_string(state)
            .map_err(|e| SupervisorError::StatePersistFailed(e.to_string()))?;
        let mut con = self.con.clone();
        // SET NX so concurrent init attempts race safely.
        let created: bool = con
            .set_nx(&self.state_key, blob)
            .await
            .map_err(|e| SupervisorError::StatePersistFailed(e.to_string()))?;
        if !created {
            return Err(SupervisorError::StateExists);
        }
        Ok(())
    }

    async fn delete(&self) -> SupervisorResult<()> {
        let mut con = self.con.clone();
        con.del::<_, ()>(&self.state_key)
            .await
            .map_err(|e| SupervisorError::StatePersistFailed(e.to_string()))?;
        Ok(())
    }
}
