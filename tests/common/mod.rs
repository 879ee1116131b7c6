//! In-memory fakes of the persistence and provider ports, shared by the
//! integration tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use foundry::domain::errors::{SupervisorError, SupervisorResult};
use foundry::domain::models::{
    CachedCriterion, CircuitBreakerStatus, InvocationStatus, ProviderInvocation, ProviderResult,
    SessionListing, SupervisorState, Task,
};
use foundry::domain::ports::{
    BreakerStore, Provider, StateStore, TaskQueue, ValidationCache,
};

/// State store over one in-memory slot, mirroring the single-key blob
/// discipline.
pub struct MemoryStateStore {
    blob: Mutex<Option<String>>,
    pub persist_count: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            blob: Mutex::new(None),
            persist_count: AtomicUsize::new(0),
        }
    }

    pub async fn seed(&self, state: &SupervisorState) {
        *self.blob.lock().await = Some(serde_json::to_string(state).unwrap());
    }

    pub async fn snapshot(&self) -> SupervisorState {
        let blob = self.blob.lock().await;
        serde_json::from_str(blob.as_ref().expect("state seeded")).unwrap()
    }

    pub fn persists(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> SupervisorResult<SupervisorState> {
        let blob = self.blob.lock().await;
        let Some(raw) = blob.as_ref() else {
            return Err(SupervisorError::StateNotFound);
        };
        let value: Value =
            serde_json::from_str(raw).map_err(|e| SupervisorError::StateCorrupt(e.to_string()))?;
        SupervisorState::validate_required_fields(&value)
            .map_err(SupervisorError::MissingStateField)?;
        serde_json::from_value(value).map_err(|e| SupervisorError::StateCorrupt(e.to_string()))
    }

    async fn persist(&self, state: &mut SupervisorState) -> SupervisorResult<()> {
        state.last_updated = Utc::now();
        let raw = serde_json::to_string(state)
            .map_err(|e| SupervisorError::StatePersistFailed(e.to_string()))?;
        *self.blob.lock().await = Some(raw);
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn init(&self, state: &mut SupervisorState) -> SupervisorResult<()> {
        let mut blob = self.blob.lock().await;
        if blob.is_some() {
            return Err(SupervisorError::StateExists);
        }
        state.last_updated = Utc::now();
        *blob = Some(
            serde_json::to_string(state)
                .map_err(|e| SupervisorError::StatePersistFailed(e.to_string()))?,
        );
        Ok(())
    }

    async fn delete(&self) -> SupervisorResult<()> {
        *self.blob.lock().await = None;
        Ok(())
    }
}

/// FIFO queue over an in-memory deque of serialized tasks.
pub struct MemoryTaskQueue {
    items: Mutex<VecDeque<String>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn seed(&self, tasks: &[Task]) {
        let mut items = self.items.lock().await;
        for task in tasks {
            items.push_front(serde_json::to_string(task).unwrap());
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: &Task) -> SupervisorResult<()> {
        let payload = serde_json::to_string(task)
            .map_err(|e| SupervisorError::QueueIo(e.to_string()))?;
        self.items.lock().await.push_front(payload);
        Ok(())
    }

    async fn dequeue(&self) -> SupervisorResult<Option<Task>> {
        let raw = self.items.lock().await.pop_back();
        raw.map(|r| {
            serde_json::from_str(&r).map_err(|e| SupervisorError::QueueIo(e.to_string()))
        })
        .transpose()
    }

    async fn peek(&self, n: usize) -> SupervisorResult<Vec<Task>> {
        let items = self.items.lock().await;
        items
            .iter()
            .rev()
            .take(n)
            .map(|r| {
                serde_json::from_str(r).map_err(|e| SupervisorError::QueueIo(e.to_string()))
            })
            .collect()
    }

    async fn len(&self) -> SupervisorResult<usize> {
        Ok(self.items.lock().await.len())
    }

    async fn update_in_place(&self, task_id: &str, patch: &Value) -> SupervisorResult<bool> {
        let mut items = self.items.lock().await;
        for raw in items.iter_mut() {
            let mut value: Value = serde_json::from_str(raw)
                .map_err(|e| SupervisorError::QueueIo(e.to_string()))?;
            if value.get("task_id").and_then(Value::as_str) != Some(task_id) {
                continue;
            }
            if let (Some(obj), Some(patch_obj)) = (value.as_object_mut(), patch.as_object()) {
                for (k, v) in patch_obj {
                    obj.insert(k.clone(), v.clone());
                }
            }
            *raw = serde_json::to_string(&value)
                .map_err(|e| SupervisorError::QueueIo(e.to_string()))?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn remove(&self, task_id: &str) -> SupervisorResult<bool> {
        let mut items = self.items.lock().await;
        let before = items.len();
        let mut seen = false;
        items.retain(|raw| {
            if seen {
                return true;
            }
            let matches = serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|v| v.get("task_id").and_then(Value::as_str).map(str::to_string))
                .is_some_and(|id| id == task_id);
            if matches {
                seen = true;
            }
            !matches
        });
        Ok(items.len() != before)
    }

    async fn drain(&self) -> SupervisorResult<u64> {
        let mut items = self.items.lock().await;
        let len = items.len() as u64;
        items.clear();
        Ok(len)
    }
}

/// Breaker store honoring expiry, mirroring SETEX semantics.
pub struct MemoryBreakerStore {
    entries: Mutex<HashMap<String, CircuitBreakerStatus>>,
}

impl MemoryBreakerStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BreakerStore for MemoryBreakerStore {
    async fn get(&self, provider: &str) -> SupervisorResult<Option<CircuitBreakerStatus>> {
        let mut entries = self.entries.lock().await;
        if let Some(status) = entries.get(provider) {
            if status.is_expired() {
                entries.remove(provider);
                return Ok(None);
            }
            return Ok(Some(status.clone()));
        }
        Ok(None)
    }

    async fn put(&self, status: &CircuitBreakerStatus, _ttl_secs: u64) -> SupervisorResult<()> {
        self.entries
            .lock()
            .await
            .insert(status.provider.clone(), status.clone());
        Ok(())
    }

    async fn delete(&self, provider: &str) -> SupervisorResult<()> {
        self.entries.lock().await.remove(provider);
        Ok(())
    }
}

/// Validation cache over a plain map.
pub struct MemoryValidationCache {
    entries: Mutex<HashMap<String, CachedCriterion>>,
}

impl MemoryValidationCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ValidationCache for MemoryValidationCache {
    async fn get(&self, key: &str) -> SupervisorResult<Option<CachedCriterion>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: &CachedCriterion,
        _ttl_secs: u64,
    ) -> SupervisorResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// One scripted provider response, optionally materializing files in the
/// working directory the way a real agent would.
pub struct ScriptedResponse {
    pub stdout: String,
    pub exit_code: i32,
    pub files: Vec<(PathBuf, String)>,
}

impl ScriptedResponse {
    pub fn text(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            exit_code: 0,
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((PathBuf::from(path), contents.to_string()));
        self
    }

    /// A well-formed trailer with the given file lists and summary.
    pub fn trailer(files_created: &[&str], summary: &str) -> Self {
        let trailer = serde_json::json!({
            "status": "completed",
            "files_created": files_created,
            "files_updated": [],
            "changes": files_created,
            "neededChanges": true,
            "summary": summary,
        });
        Self::text(&trailer.to_string())
    }
}

/// Provider that replays a scripted response queue and records every
/// prompt it is given.
pub struct ScriptedProvider {
    tag: String,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    pub prompts: Mutex<Vec<String>>,
    pub invocations: AtomicUsize,
    /// When set, flips after the given invocation count so the loop exits
    /// at the next iteration boundary.
    shutdown_after: Option<(usize, Arc<AtomicBool>)>,
}

impl ScriptedProvider {
    pub fn new(tag: &str, responses: Vec<ScriptedResponse>) -> Self {
        Self {
            tag: tag.to_string(),
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            invocations: AtomicUsize::new(0),
            shutdown_after: None,
        }
    }

    pub fn with_shutdown_after(mut self, count: usize, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_after = Some((count, flag));
        self
    }

    pub fn calls(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn invoke(&self, invocation: ProviderInvocation) -> SupervisorResult<ProviderResult> {
        let count = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().await.push(invocation.prompt.clone());

        if let Some((after, ref flag)) = self.shutdown_after {
            if count >= after {
                flag.store(true, Ordering::SeqCst);
            }
        }

        let Some(response) = self.responses.lock().await.pop_front() else {
            return Ok(ProviderResult::synthetic_failure(
                "scripted provider ran out of responses",
            ));
        };

        for (path, contents) in &response.files {
            let target = invocation.working_directory.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            std::fs::write(target, contents).expect("scripted file write");
        }

        Ok(ProviderResult {
            provider: self.tag.clone(),
            stdout: response.stdout.clone(),
            stderr: String::new(),
            exit_code: Some(response.exit_code),
            raw_output: response.stdout,
            status: if response.exit_code == 0 {
                InvocationStatus::Completed
            } else {
                InvocationStatus::Failed
            },
            session_id: None,
            usage: None,
        })
    }

    async fn list_sessions(&self) -> SupervisorResult<Vec<SessionListing>> {
        Ok(Vec::new())
    }
}
