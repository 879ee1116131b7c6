//! Redis connection management.
//!
//! Two logical databases back the supervisor: the state database (state
//! blob, circuit breakers, validation cache) and the queue database. Their
//! indices must differ; construction enforces that.

use redis::aio::ConnectionManager;
use redis::Client;

use crate::domain::errors::{SupervisorError, SupervisorResult};

/// Connection parameters for the two logical databases.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    /// Database index holding the state blob, breakers and cache.
    pub state_db: u8,
    /// Database index holding the task queue list. Must differ from
    /// `state_db`.
    pub queue_db: u8,
}

/// Managed connections to the state and queue databases.
#[derive(Clone)]
pub struct RedisConnections {
    state: ConnectionManager,
    queue: ConnectionManager,
}

impl RedisConnections {
    /// Connect both managers, validating the database split.
    pub async fn connect(settings: &RedisSettings) -> SupervisorResult<Self> {
        if settings.state_db == settings.queue_db {
            return Err(SupervisorError::ConfigInvalid(format!(
                "queue database index {} must differ from state database index {}",
                settings.queue_db, settings.state_db
            )));
        }

        let state = Self::manager(settings, settings.state_db).await?;
        let queue = Self::manager(settings, settings.queue_db).await?;
        Ok(Self { state, queue })
    }

    async fn manager(settings: &RedisSettings, db: u8) -> SupervisorResult<ConnectionManager> {
        let url = format!("redis://{}:{}/{db}", settings.host, settings.port);
        let client = Client::open(url).map_err(|e| {
            SupervisorError::ConfigInvalid(format!("invalid redis connection parameters: {e}"))
        })?;
        ConnectionManager::new(client).await.map_err(|e| {
            SupervisorError::QueueIo(format!(
                "failed to connect to redis at {}:{} db {db}: {e}",
                settings.host, settings.port
            ))
        })
    }

    /// Connection to the state database.
    pub fn state(&self) -> ConnectionManager {
        self.state.clone()
    }

    /// Connection to the queue database.
    pub fn queue(&self) -> ConnectionManager {
        self.queue.clone()
    }
}
