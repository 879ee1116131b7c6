//! End-to-end iterations of the control loop over in-memory ports and
//! scripted providers.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use foundry::application::{ControlLoop, LoopExit};
use foundry::domain::models::{Config, ExecutionMode, SupervisorState, SupervisorStatus, Task};
use foundry::domain::ports::{BreakerStore, Provider};
use foundry::infrastructure::ast::AstRegistry;
use foundry::infrastructure::providers::ProviderRegistry;
use foundry::services::{
    CircuitBreakerService, HelperAgentDriver, ProviderDispatcher, SessionManager, Validator,
};

use common::{
    MemoryBreakerStore, MemoryStateStore, MemoryTaskQueue, MemoryValidationCache,
    ScriptedProvider, ScriptedResponse,
};

struct Harness {
    store: Arc<MemoryStateStore>,
    queue: Arc<MemoryTaskQueue>,
    breakers: Arc<MemoryBreakerStore>,
    sandbox: tempfile::TempDir,
    shutdown: Arc<AtomicBool>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStateStore::new()),
            queue: Arc::new(MemoryTaskQueue::new()),
            breakers: Arc::new(MemoryBreakerStore::new()),
            sandbox: tempfile::tempdir().unwrap(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn seed_running_state(&self, goal: &str) {
        let mut state = SupervisorState::new(ExecutionMode::Auto);
        state.goal.description = goal.to_string();
        self.store.seed(&state).await;
    }

    fn build<P: Provider + 'static>(&self, providers: Vec<Arc<P>>, config: Config) -> ControlLoop {
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn Provider>)
            .collect();
        let registry = ProviderRegistry::from_providers(providers);
        let breaker_service = CircuitBreakerService::new(
            self.breakers.clone(),
            config.providers.breaker_ttl_secs,
        );
        let dispatcher =
            ProviderDispatcher::new(registry, breaker_service, Duration::from_secs(60));
        let validator = Validator::new(
            Arc::new(MemoryValidationCache::new()),
            AstRegistry::with_builtin(),
            config.validation.cache_ttl_secs,
        );
        let helper = HelperAgentDriver::new(config.helper.clone());
        let session_manager = SessionManager::new(config.session.clone());

        ControlLoop::new(
            self.store.clone(),
            self.queue.clone(),
            dispatcher,
            validator,
            helper,
            session_manager,
            config,
            self.sandbox.path().to_path_buf(),
            self.shutdown.clone(),
        )
    }

    fn audit_path(&self) -> std::path::PathBuf {
        self.sandbox.path().join("default").join("audit.log.jsonl")
    }

    fn prompts_path(&self) -> std::path::PathBuf {
        self.sandbox
            .path()
            .join("default")
            .join("logs")
            .join("prompts.log.jsonl")
    }
}

fn goal_completed_response(completed: bool) -> ScriptedResponse {
    ScriptedResponse::text(&format!(
        "{{\"goal_completed\": {completed}, \"reasoning\": \"assessed from completed work\"}}"
    ))
}

#[tokio::test]
async fn happy_path_completes_goal_and_exhausts_queue() {
    let harness = Harness::new();
    harness.seed_running_state("Implement greet").await;

    let mut task = Task::new(
        "T1",
        "create greeting.ts exporting greet",
        vec!["function greet exists".to_string()],
    );
    task.required_artifacts = vec!["greeting.ts".to_string()];
    harness.queue.seed(&[task]).await;

    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![
            ScriptedResponse::trailer(&["greeting.ts"], "created greeting.ts with the greet function")
                .with_file(
                    "greeting.ts",
                    "export function greet(name: string): string { return `hello ${name}`; }",
                ),
            goal_completed_response(true),
        ],
    ));

    let exit = harness
        .build(vec![gemini.clone()], Config::default())
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(gemini.calls(), 2);

    let state = harness.store.snapshot().await;
    assert_eq!(state.supervisor.status, SupervisorStatus::Completed);
    assert!(state.goal.completed);
    assert!(state.queue.exhausted);
    assert_eq!(state.completed_tasks.len(), 1);
    assert_eq!(state.completed_tasks[0].task_id, "T1");
    assert!(state.completed_tasks[0].validation_report.valid);
    assert!(state.current_task.is_none());

    let audit = std::fs::read_to_string(harness.audit_path()).unwrap();
    assert!(audit.contains("TASK_START"));
    assert!(audit.contains("TASK_COMPLETE"));
    assert!(audit.contains("COMPLETED"));

    let prompts = std::fs::read_to_string(harness.prompts_path()).unwrap();
    assert!(prompts.contains("\"PROMPT\""));
    assert!(prompts.contains("\"RESPONSE\""));
    assert!(prompts.contains("GOAL_COMPLETION_CHECK"));
    assert!(prompts.contains("GOAL_COMPLETION_RESPONSE"));
}

#[tokio::test]
async fn ambiguous_response_triggers_clarification_retry() {
    let harness = Harness::new();
    harness.seed_running_state("Build the widget").await;
    harness
        .queue
        .seed(&[Task::new("T1", "build the widget module", vec![])])
        .await;

    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![
            ScriptedResponse::trailer(&[], "This could work in several ways"),
            ScriptedResponse::trailer(&[], "Implemented the widget module and wired it in."),
            goal_completed_response(true),
        ],
    ));

    let exit = harness
        .build(vec![gemini.clone()], Config::default())
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(gemini.calls(), 3);

    let state = harness.store.snapshot().await;
    assert_eq!(state.completed_tasks.len(), 1);
    assert_eq!(
        state.supervisor.per_task.get("T1").map(|a| a.retry_count),
        Some(1)
    );

    let prompts = gemini.prompts.lock().await;
    assert!(prompts[1].contains("declarative"), "second dispatch is a clarification");
    assert!(prompts[1].contains("forbidden"));

    let log = std::fs::read_to_string(harness.prompts_path()).unwrap();
    assert!(log.contains("CLARIFICATION_PROMPT"));
}

#[tokio::test]
async fn quota_failure_falls_back_to_next_provider_and_trips_breaker() {
    let harness = Harness::new();
    harness.seed_running_state("Ship it").await;
    harness
        .queue
        .seed(&[Task::new("T1", "write the shipping module", vec![])])
        .await;

    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![ScriptedResponse::text("Quota exceeded for project")],
    ));
    let cursor = Arc::new(ScriptedProvider::new(
        "cursor",
        vec![
            ScriptedResponse::trailer(&[], "Implemented the shipping module."),
            goal_completed_response(true),
        ],
    ));

    let exit = harness
        .build(vec![gemini.clone(), cursor.clone()], Config::default())
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(gemini.calls(), 1);
    // Task dispatch fell through to cursor; the goal check skipped the
    // broken gemini entirely.
    assert_eq!(cursor.calls(), 2);

    let breaker = harness.breakers.get("gemini").await.unwrap().unwrap();
    assert_eq!(breaker.error_type, "quota_exceeded");
    assert!(harness.breakers.get("cursor").await.unwrap().is_none());

    let state = harness.store.snapshot().await;
    assert_eq!(state.completed_tasks.len(), 1);
}

#[tokio::test]
async fn resource_exhaustion_schedules_persistent_backoff() {
    let harness = Harness::new();
    harness.seed_running_state("Anything").await;
    harness
        .queue
        .seed(&[Task::new("T1", "do the work", vec![])])
        .await;

    let gemini = Arc::new(
        ScriptedProvider::new(
            "gemini",
            vec![ScriptedResponse::text(
                "ConnectError: [resource_exhausted] please slow down",
            )],
        )
        .with_shutdown_after(1, harness.shutdown.clone()),
    );

    let exit = harness
        .build(vec![gemini.clone()], Config::default())
        .run()
        .await
        .unwrap();

    // The cancel flag fired after the single dispatch; the loop halted at
    // the next iteration boundary instead of sleeping out the backoff.
    assert_eq!(exit, LoopExit::Halted);
    assert_eq!(gemini.calls(), 1);

    let state = harness.store.snapshot().await;
    let retry = state.supervisor.resource_exhausted_retry.expect("backoff persisted");
    assert_eq!(retry.attempt, 1);
    let delta = (retry.next_retry_at - retry.last_attempt_at).num_seconds();
    assert!((59..=61).contains(&delta), "first delay is one minute, got {delta}s");

    // The task is retained, not blocked.
    assert_eq!(
        state.current_task.as_ref().map(|t| t.task_id.as_str()),
        Some("T1")
    );
    assert!(state.blocked_tasks.is_empty());

    let audit = std::fs::read_to_string(harness.audit_path()).unwrap();
    assert!(audit.contains("RESOURCE_EXHAUSTED_RETRY"));
}

#[tokio::test]
async fn repeated_identical_error_blocks_task_despite_retry_budget() {
    let harness = Harness::new();
    harness.seed_running_state("Create x").await;

    let mut task = Task::new("T1", "create the x module", vec![]);
    task.required_artifacts = vec!["src/x.ts".to_string()];
    task.retry_policy.max_retries = 5;
    harness.queue.seed(&[task]).await;

    let helper_verdict =
        r#"{"isValid": false, "verificationCommands": [], "reasoning": "artifact absent"}"#;
    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![
            ScriptedResponse::trailer(&[], "done building"),
            ScriptedResponse::text(helper_verdict),
            ScriptedResponse::trailer(&[], "done building"),
            ScriptedResponse::text(helper_verdict),
            ScriptedResponse::trailer(&[], "done building"),
            ScriptedResponse::text(helper_verdict),
            goal_completed_response(false),
        ],
    ));

    let exit = harness
        .build(vec![gemini.clone()], Config::default())
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Halted);

    let state = harness.store.snapshot().await;
    assert_eq!(state.blocked_tasks.len(), 1);
    assert_eq!(state.blocked_tasks[0].task_id, "T1");
    assert_eq!(
        state.blocked_tasks[0].reason,
        "required artifact missing: src/x.ts"
    );
    assert!(state.current_task.is_none());
    assert_eq!(
        state.supervisor.halt_reason.as_deref(),
        Some("TASK_LIST_EXHAUSTED_GOAL_INCOMPLETE")
    );

    let audit = std::fs::read_to_string(harness.audit_path()).unwrap();
    assert!(audit.contains("TASK_BLOCKED"));
}

#[tokio::test]
async fn helper_commands_rescue_failed_validation_without_interrogation() {
    let harness = Harness::new();
    harness.seed_running_state("Wire login").await;

    harness
        .queue
        .seed(&[Task::new(
            "T1",
            "wire the login route",
            vec!["endpoint /login exists".to_string()],
        )])
        .await;

    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![
            ScriptedResponse::trailer(&["src/app.ts"], "wired the route")
                .with_file("src/app.ts", "app.post('/login', loginHandler);\n"),
            ScriptedResponse::text(
                r#"{"isValid": false, "verificationCommands": ["grep -n login src/app.ts"], "reasoning": "verify on disk"}"#,
            ),
            goal_completed_response(true),
        ],
    ));

    let exit = harness
        .build(vec![gemini.clone()], Config::default())
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(gemini.calls(), 3);

    let state = harness.store.snapshot().await;
    assert_eq!(state.completed_tasks.len(), 1);
    let report = &state.completed_tasks[0].validation_report;
    assert!(report.valid);
    assert!(report
        .rules_passed
        .contains(&"helper_verification_commands_passed".to_string()));

    // No interrogation round was needed once the helper confirmed.
    let log = std::fs::read_to_string(harness.prompts_path()).unwrap();
    assert!(!log.contains("INTERROGATION_PROMPT"));
    assert!(log.contains("HELPER_AGENT_RESPONSE"));
}

#[tokio::test]
async fn empty_queue_with_goal_check_disabled_halts() {
    let harness = Harness::new();
    harness.seed_running_state("Never finished").await;

    let gemini = Arc::new(ScriptedProvider::new("gemini", vec![]));
    let mut config = Config::default();
    config.goal_check.enabled = false;

    let exit = harness
        .build(vec![gemini.clone()], config)
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Halted);
    assert_eq!(gemini.calls(), 0, "no child process may be spawned");

    let state = harness.store.snapshot().await;
    assert_eq!(state.supervisor.status, SupervisorStatus::Halted);
    assert!(state.queue.exhausted);
    assert_eq!(
        state.supervisor.halt_reason.as_deref(),
        Some("TASK_LIST_EXHAUSTED_GOAL_INCOMPLETE")
    );
}

#[tokio::test]
async fn completed_state_is_a_noop() {
    let harness = Harness::new();
    let mut state = SupervisorState::new(ExecutionMode::Auto);
    state.supervisor.status = SupervisorStatus::Completed;
    state.goal.completed = true;
    harness.store.seed(&state).await;

    let gemini = Arc::new(ScriptedProvider::new("gemini", vec![]));
    let exit = harness
        .build(vec![gemini.clone()], Config::default())
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(gemini.calls(), 0);
    assert_eq!(harness.store.persists(), 0, "no state writes beyond the load");
}

#[tokio::test]
async fn tasks_dispatch_in_enqueue_order() {
    let harness = Harness::new();
    harness.seed_running_state("Two steps").await;
    harness
        .queue
        .seed(&[
            Task::new("first", "do the first thing", vec![]),
            Task::new("second", "do the second thing", vec![]),
        ])
        .await;

    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![
            ScriptedResponse::trailer(&[], "Finished the first thing."),
            ScriptedResponse::trailer(&[], "Finished the second thing."),
            goal_completed_response(true),
        ],
    ));

    let exit = harness
        .build(vec![gemini.clone()], Config::default())
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Completed);
    let state = harness.store.snapshot().await;
    let order: Vec<&str> = state
        .completed_tasks
        .iter()
        .map(|c| c.task_id.as_str())
        .collect();
    assert_eq!(order, vec!["first", "second"]);

    let prompts = gemini.prompts.lock().await;
    assert!(prompts[0].contains("do the first thing"));
    assert!(prompts[1].contains("do the second thing"));
}

#[tokio::test]
async fn last_updated_advances_on_every_persist() {
    let harness = Harness::new();
    harness.seed_running_state("Timestamps").await;
    harness
        .queue
        .seed(&[Task::new("T1", "do the work", vec![])])
        .await;
    let seeded = harness.store.snapshot().await.last_updated;

    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![
            ScriptedResponse::trailer(&[], "Finished the work."),
            goal_completed_response(true),
        ],
    ));

    harness
        .build(vec![gemini], Config::default())
        .run()
        .await
        .unwrap();

    let state = harness.store.snapshot().await;
    assert!(state.last_updated > seeded);
    assert!(harness.store.persists() >= 2, "pre-dispatch and post-completion writes");
}

#[tokio::test]
async fn working_directory_is_scoped_under_sandbox_root(){
    let harness = Harness::new();
    harness.seed_running_state("Scoped").await;
    harness
        .queue
        .seed(&[Task::new("T1", "write a file", vec![])])
        .await;

    let gemini = Arc::new(ScriptedProvider::new(
        "gemini",
        vec![
            ScriptedResponse::trailer(&["out.txt"], "Wrote the file.")
                .with_file("out.txt", "hello"),
            goal_completed_response(true),
        ],
    ));

    harness
        .build(vec![gemini], Config::default())
        .run()
        .await
        .unwrap();

    // Goal has no project id; the default project directory applies.
    assert!(harness.sandbox.path().join("default").join("out.txt").exists());
}
