//! Redis-backed FIFO task queue.
//!
//! LPUSH on enqueue, RPOP on dequeue, one JSON document per element.
//! Lives in the queue database, never the state database.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::Task;
use crate::domain::ports::TaskQueue;

/// FIFO queue over a Redis list.
pub struct RedisTaskQueue {
    con: ConnectionManager,
    queue_key: String,
}

impl RedisTaskQueue {
    pub fn new(con: ConnectionManager, queue_name: &str) -> Self {
        Self {
            con,
            queue_key: format!("queue:{queue_name}"),
        }
    }

    fn io(err: redis::RedisError) -> SupervisorError {
        SupervisorError::QueueIo(err.to_string())
    }

    fn decode(raw: &str) -> SupervisorResult<Task> {
        serde_json::from_str(raw)
            .map_err(|e| SupervisorError::QueueIo(format!("queued task failed to decode: {e}")))
    }

    fn encode(task: &Task) -> SupervisorResult<String> {
        serde_json::to_string(task)
            .map_err(|e| SupervisorError::QueueIo(format!("task failed to encode: {e}")))
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: &Task) -> SupervisorResult<()> {
        let payload = Self::encode(task)?;
        let mut con = self.con.clone();
        con.lpush::<_, _, ()>(&self.queue_key, payload)
            .await
            .map_err(Self::io)?;
        tracing::debug!(task_id = %task.task_id, queue = %self.queue_key, "Task enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> SupervisorResult<Option<Task>> {
        let mut con = self.con.clone();
        let raw: Option<String> = con.rpop(&self.queue_key, None).await.map_err(Self::io)?;
        raw.as_deref().map(Self::decode).transpose()
    }

    async fn peek(&self, n: usize) -> SupervisorResult<Vec<Task>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut con = self.con.clone();
        // Dequeue side is the list tail; peek from the tail backwards.
        let raw: Vec<String> = con
            .lrange(&self.queue_key, -(n as isize), -1)
            .await
            .map_err(Self::io)?;
        let mut tasks = raw
            .iter()
            .map(|r| Self::decode(r))
            .collect::<SupervisorResult<Vec<_>>>()?;
        // LRANGE returns head-to-tail order; dequeue order is the reverse.
        tasks.reverse();
        Ok(tasks)
    }

    async fn len(&self) -> SupervisorResult<usize> {
        let mut con = self.con.clone();
        con.llen(&self.queue_key).await.map_err(Self::io)
    }

    async fn update_in_place(&self, task_id: &str, patch: &Value) -> SupervisorResult<bool> {
        let patch_obj = patch
            .as_object()
            .ok_or_else(|| SupervisorError::QueueIo("patch must be a JSON object".to_string()))?;

        let mut con = self.con.clone();
        let raw: Vec<String> = con
            .lrange(&self.queue_key, 0, -1)
            .await
            .map_err(Self::io)?;

        for (index, element) in raw.iter().enumerate() {
            let mut value: Value = serde_json::from_str(element)
                .map_err(|e| SupervisorError::QueueIo(format!("queued task failed to decode: {e}")))?;
            if value.get("task_id").and_then(Value::as_str) != Some(task_id) {
                continue;
            }
            let obj = value.as_object_mut().ok_or_else(|| {
                SupervisorError::QueueIo("queued task is not a JSON object".to_string())
            })?;
            for (key, val) in patch_obj {
                obj.insert(key.clone(), val.clone());
            }
            // Re-validate the patched document still decodes as a Task.
            let patched: Task = serde_json::from_value(value.clone()).map_err(|e| {
                SupervisorError::QueueIo(format!("patched task no longer decodes: {e}"))
            })?;
            let payload = Self::encode(&patched)?;
            con.lset::<_, _, ()>(&self.queue_key, index as isize, payload)
                .await
                .map_err(Self::io)?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn remove(&self, task_id: &str) -> SupervisorResult<bool> {
        let mut con = self.con.clone();
        let raw: Vec<String> = con
            .lrange(&self.queue_key, 0, -1)
            .await
            .map_err(Self::io)?;

        for element in &raw {
            let value: Value = serde_json::from_str(element)
                .map_err(|e| SupervisorError::QueueIo(format!("queued task failed to decode: {e}")))?;
            if value.get("task_id").and_then(Value::as_str) == Some(task_id) {
                // LREM on the exact serialized payload; first match only.
                let removed: usize = con
                    .lrem(&self.queue_key, 1, element)
                    .await
                    .map_err(Self::io)?;
                return Ok(removed > 0);
            }
        }
        Ok(false)
    }

    async fn drain(&self) -> SupervisorResult<u64> {
        let mut con = self.con.clone();
        let len: u64 = con.llen(&self.queue_key).await.map_err(Self::io)?;
        con.del::<_, ()>(&self.queue_key).await.map_err(Self::io)?;
        Ok(len)
    }
}
