//! Redis-backed validation cache.
//!
//! Keys are `validation_cache:<project>:<sha256(criterion)>:<sha256(file
//! contents)>`; values are cached per-criterion verdicts with a TTL.
//! The cache is strictly best-effort: store trouble degrades to a miss.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::domain::errors::SupervisorResult;
use crate::domain::models::CachedCriterion;
use crate::domain::ports::ValidationCache;

pub struct RedisValidationCache {
    con: ConnectionManager,
}

impl RedisValidationCache {
    pub fn new(con: ConnectionManager) -> Self {
        Self { con }
    }
}

/// Build a cache key from the project, a criterion, and the sorted file
/// contents the criterion was evaluated against.
pub fn cache_key(project_id: &str, criterion: &str, sorted_file_contents: &[&str]) -> String {
    let criterion_hash = hex::encode(Sha256::digest(criterion.as_bytes()));
    let mut content_hasher = Sha256::new();
    for contents in sorted_file_contents {
        content_hasher.update(contents.as_bytes());
        content_hasher.update([0u8]);
    }
    let contents_hash = hex::encode(content_hasher.finalize());
    format!("validation_cache:{project_id}:{criterion_hash}:{contents_hash}")
}

#[async_trait]
impl ValidationCache for RedisValidationCache {
    async fn get(&self, key: &str) -> SupervisorResult<Option<CachedCriterion>> {
        let mut con = self.con.clone();
        let raw: Option<String> = match con.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "Validation cache read failed; miss");
                return Ok(None);
            }
        };
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }

    async fn put(
        &self,
        key: &str,
        value: &CachedCriterion,
        ttl_secs: u64,
    ) -> SupervisorResult<()> {
        let Ok(payload) = serde_json::to_string(value) else {
            return Ok(());
        };
        let mut con = self.con.clone();
        if let Err(e) = con.set_ex::<_, _, ()>(key, payload, ttl_secs).await {
            tracing::debug!(error = %e, "Validation cache write failed; skipping");
        }
        Ok(())
    }
}
