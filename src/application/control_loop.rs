//! The fixed iteration protocol.
//!
//! One sequential loop owns all state mutation: load, select, dispatch,
//! validate, persist, audit. Nothing else writes the blob. Every decision
//! point below maps to a numbered step of the iteration protocol; the
//! order is load-bearing and must not be rearranged.

use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::{
    CompletedTask, Config, HaltReason, ProviderResult, ResourceExhaustedRetry, SupervisorState,
    SupervisorStatus, Task, TaskStatus,
};
use crate::domain::ports::{StateStore, TaskQueue};
use crate::services::audit_log::{AuditEntry, AuditEvent, AuditLogger};
use crate::services::dispatcher::{ProviderDispatcher, SessionHandle};
use crate::services::halt_detector::{HaltClassification, HaltDetector};
use crate::services::helper_agent::{HelperAgentDriver, HelperVerdictSource};
use crate::services::interrogator::Interrogator;
use crate::services::output_parser::OutputParser;
use crate::services::prompt_builder::PromptBuilder;
use crate::services::prompt_log::{PromptLogEntry, PromptLogType, PromptLogger};
use crate::services::recovery::{RecoveryAction, RecoveryDetector};
use crate::services::session_manager::SessionManager;
use crate::services::validator::Validator;

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Goal complete; exit code 0.
    Completed,
    /// Hard or operator halt; exit code 1.
    Halted,
}

/// Which prompt kind an attempt dispatches.
#[derive(Debug, Clone)]
enum AttemptKind {
    Initial,
    Fix { strict: bool },
    Clarification { previous_output: String },
}

/// Everything one attempt produced.
struct AttemptOutcome {
    result: ProviderResult,
    report: crate::domain::models::ValidationReport,
    halt: Option<HaltClassification>,
    prompt: String,
}

pub struct ControlLoop {
    state_store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
    dispatcher: ProviderDispatcher,
    validator: Validator,
    helper: HelperAgentDriver,
    session_manager: SessionManager,
    config: Config,
    sandbox_root: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_store: Arc<dyn StateStore>,
        queue: Arc<dyn TaskQueue>,
        dispatcher: ProviderDispatcher,
        validator: Validator,
        helper: HelperAgentDriver,
        session_manager: SessionManager,
        config: Config,
        sandbox_root: PathBuf,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state_store,
            queue,
            dispatcher,
            validator,
            helper,
            session_manager,
            config,
            sandbox_root,
            shutdown,
        }
    }

    /// Run iterations until the status leaves RUNNING or the operator
    /// cancels.
    pub async fn run(&self) -> SupervisorResult<LoopExit> {
        let mut recovery_checked = false;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return self.operator_cancel().await;
            }

            // Step 1-2: load; decode and required-field validation live in
            // the store.
            let mut state = self.state_store.load().await?;
            let project_id = Self::project_id(&state);
            let audit = AuditLogger::for_project(&self.sandbox_root, &project_id);

            // Recovery pass, once per process start.
            if !recovery_checked {
                recovery_checked = true;
                if let Some(exit) = self.run_recovery(&mut state, &audit).await? {
                    return Ok(exit);
                }
            }

            // Step 3: only RUNNING states execute.
            match state.supervisor.status {
                SupervisorStatus::Completed => return Ok(LoopExit::Completed),
                SupervisorStatus::Halted => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                SupervisorStatus::Running => {}
            }

            // Step 4: resource-exhausted backoff gate.
            if let Some(ref retry) = state.supervisor.resource_exhausted_retry {
                let now = Utc::now();
                if retry.next_retry_at > now {
                    let remaining = (retry.next_retry_at - now).num_seconds().max(1) as u64;
                    let chunk = remaining.min(60);
                    tracing::info!(
                        attempt = retry.attempt,
                        remaining_secs = remaining,
                        "Waiting out resource-exhausted backoff"
                    );
                    tokio::time::sleep(Duration::from_secs(chunk)).await;
                    continue;
                }
            }

            // Step 5: task selection; crash recovery first, then the
            // parked retry, then the queue.
            let (task, from_current) = if let Some(task) = state.current_task.clone() {
                (Some(task), true)
            } else if let Some(task) = state.supervisor.retry_task.take() {
                (Some(task), false)
            } else {
                (self.queue.dequeue().await?, false)
            };

            let Some(mut task) = task else {
                // Step 6: queue exhausted.
                if let Some(exit) = self.handle_exhausted_queue(&mut state, &audit).await? {
                    return Ok(exit);
                }
                continue;
            };

            // Step 7: persist the selection before any dispatch.
            task.status = TaskStatus::InProgress;
            if from_current {
                tracing::info!(task_id = %task.task_id, "Re-dispatching task found in current_task");
            }
            state.current_task = Some(task.clone());
            let working_directory = self.working_directory(&task, &project_id);
            tokio::fs::create_dir_all(&working_directory)
                .await
                .map_err(|e| SupervisorError::SandboxEscape(format!(
                    "cannot create working directory {}: {e}",
                    working_directory.display()
                )))?;
            self.state_store.persist(&mut state).await?;

            let before = Self::state_digest(&state);
            audit
                .append(
                    &AuditEntry::new(AuditEvent::TaskStart)
                        .with_task(&task.task_id)
                        .with_tool(task.tool.clone().unwrap_or_else(|| "auto".to_string())),
                )
                .await?;

            match self
                .execute_task(&mut state, &task, &working_directory, &project_id, &before)
                .await?
            {
                Some(exit) => return Ok(exit),
                None => continue,
            }
        }
    }

    /// Steps 8-18 for one selected task. Returns Some(exit) on terminal
    /// transitions.
    async fn execute_task(
        &self,
        state: &mut SupervisorState,
        task: &Task,
        working_directory: &Path,
        project_id: &str,
        state_before: &Value,
    ) -> SupervisorResult<Option<LoopExit>> {
        let audit = AuditLogger::for_project(&self.sandbox_root, project_id);
        let prompts = PromptLogger::for_project(&self.sandbox_root, project_id);
        let feature_id = task.feature_id(Some(project_id));

        let mut attempt_kind = AttemptKind::Initial;
        let mut retried_this_iteration = false;

        loop {
            let outcome = self
                .attempt(
                    state,
                    task,
                    &attempt_kind,
                    working_directory,
                    project_id,
                    &feature_id,
                    &prompts,
                )
                .await?;

            // Step 11: critical reasons halt outright.
            if let Some(ref halt) = outcome.halt {
                if halt.reason == HaltReason::ResourceExhausted {
                    return self.enter_backoff(state, &audit, &halt.details).await;
                }
                if halt.critical {
                    self.halt(state, &audit, halt.reason.as_str(), &halt.details)
                        .await?;
                    return Ok(Some(LoopExit::Halted));
                }
            }

            let needs_retry = !outcome.report.valid || outcome.halt.is_some();
            if !needs_retry {
                self.complete_task(state, task, &audit, outcome, state_before)
                    .await?;
                return Ok(None);
            }

            // Step 15: retry bookkeeping, repeated-error detection first.
            let reason = outcome
                .report
                .reason
                .clone()
                .or_else(|| outcome.halt.as_ref().map(|h| h.details.clone()))
                .unwrap_or_else(|| "validation failed".to_string());

            let cap = self.config.retry.repeated_error_cap;
            let attempt_state = state.attempt_state_mut(&task.task_id);
            if attempt_state.last_error.as_deref() == Some(reason.as_str()) {
                attempt_state.repeated_error_count += 1;
            } else {
                attempt_state.repeated_error_count = 1;
                attempt_state.last_error = Some(reason.clone());
            }
            let repeated = attempt_state.repeated_error_count;
            let retry_count = attempt_state.retry_count;

            if repeated >= cap {
                tracing::warn!(
                    task_id = %task.task_id,
                    repeated,
                    "Identical validation error repeated; blocking task"
                );
                self.block_task(state, task, &audit, &reason).await?;
                return Ok(None);
            }

            let max_retries = task.retry_policy.max_retries;
            if retry_count < max_retries {
                if retried_this_iteration {
                    // One fix dispatch per iteration; park for the next.
                    let mut parked = task.clone();
                    parked.status = TaskStatus::Pending;
                    state.supervisor.retry_task = Some(parked);
                    state.current_task = None;
                    self.state_store.persist(state).await?;
                    return Ok(None);
                }

                state.attempt_state_mut(&task.task_id).retry_count += 1;
                self.state_store.persist(state).await?;

                let wants_clarification = outcome
                    .halt
                    .as_ref()
                    .is_some_and(|h| h.reason.wants_clarification());
                attempt_kind = if wants_clarification {
                    AttemptKind::Clarification {
                        previous_output: outcome.result.stdout.clone(),
                    }
                } else {
                    AttemptKind::Fix {
                        strict: repeated >= 2,
                    }
                };
                retried_this_iteration = true;
                continue;
            }

            // Step 17: retries exhausted; one final interrogation round
            // with zero follow-ups.
            let unresolved = Self::unresolved_criteria(task, &outcome.report);
            if !unresolved.is_empty() && !task.task_type.is_behavioral() {
                let session = self.resolve_session(state, task, &feature_id).await;
                let final_round = Interrogator::interrogate(
                    &self.dispatcher,
                    task,
                    unresolved,
                    1 + self.config.interrogation.final_follow_ups,
                    session.as_ref(),
                    working_directory,
                    &self.sandbox_root,
                )
                .await;
                if let Ok(final_outcome) = final_round {
                    self.log_interrogation(&prompts, task, &final_outcome).await?;
                    if final_outcome.all_criteria_satisfied {
                        let mut confirmed = outcome;
                        confirmed.report.confirm("final_interrogation_confirmation");
                        self.complete_task(state, task, &audit, confirmed, state_before)
                            .await?;
                        return Ok(None);
                    }
                }
            }

            self.block_task(state, task, &audit, &reason).await?;
            return Ok(None);
        }
    }

    /// One dispatch + parse + classify + validate + helper + interrogation
    /// pass.
    async fn attempt(
        &self,
        state: &mut SupervisorState,
        task: &Task,
        kind: &AttemptKind,
        working_directory: &Path,
        project_id: &str,
        feature_id: &str,
        prompts: &PromptLogger,
    ) -> SupervisorResult<AttemptOutcome> {
        // Step 8: prompt construction.
        let snapshot = PromptBuilder::snapshot(task, state, project_id, &self.sandbox_root);
        let (prompt, prompt_type) = match kind {
            AttemptKind::Initial => (
                PromptBuilder::initial(task, &snapshot, working_directory),
                PromptLogType::Prompt,
            ),
            AttemptKind::Fix { strict } => {
                let report = state
                    .last_validation_report
                    .clone()
                    .unwrap_or_else(|| {
                        crate::domain::models::ValidationReport::invalid(
                            "previous attempt failed",
                            "unknown",
                        )
                    });
                (
                    PromptBuilder::fix(task, &report, &snapshot, *strict),
                    PromptLogType::FixPrompt,
                )
            }
            AttemptKind::Clarification { previous_output } => (
                PromptBuilder::clarification(task, previous_output, &snapshot),
                PromptLogType::ClarificationPrompt,
            ),
        };

        // Step 9: session resolution under provider caps.
        let session = self.resolve_session(state, task, feature_id).await;

        // Step 10: dispatch.
        let started = std::time::Instant::now();
        let dispatch = self
            .dispatcher
            .dispatch(
                &prompt,
                working_directory,
                task.agent_mode.as_deref(),
                session.as_ref(),
                task.tool.as_deref(),
            )
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        prompts
            .append(
                &PromptLogEntry::new(prompt_type, prompt.clone())
                    .with_task(&task.task_id)
                    .with_invocation(
                        working_directory,
                        Some(&dispatch.result.provider),
                        dispatch.result.session_id.as_deref(),
                        task.agent_mode.as_deref(),
                    ),
            )
            .await?;
        prompts
            .append(
                &PromptLogEntry::new(PromptLogType::Response, dispatch.result.raw_output.clone())
                    .with_task(&task.task_id)
                    .with_invocation(
                        working_directory,
                        Some(&dispatch.result.provider),
                        dispatch.result.session_id.as_deref(),
                        task.agent_mode.as_deref(),
                    )
                    .with_duration(duration_ms),
            )
            .await?;

        // Step 12: authoritative trailer parse.
        let parsed = OutputParser::parse(&dispatch.result.stdout);

        // Step 11: halt classification.
        let halt = HaltDetector::classify(
            &dispatch.result,
            dispatch.classified,
            parsed.as_ref().err().map(|e| e.kind()),
            dispatch.circuit_broken,
        );

        // Critical reasons and provider exhaustion terminate the attempt
        // before validation; neither the helper nor interrogation can add
        // anything to a response that never ran.
        if let Some(ref h) = halt {
            if h.critical || h.reason == HaltReason::ResourceExhausted {
                let report = crate::domain::models::ValidationReport::invalid(
                    h.details.clone(),
                    h.reason.as_str(),
                );
                state.last_validation_report = Some(report.clone());
                return Ok(AttemptOutcome {
                    result: dispatch.result,
                    report,
                    halt,
                    prompt,
                });
            }
        }

        // Step 12-13: validation rule chain.
        let mut report = self
            .validator
            .validate(task, parsed.as_ref(), working_directory, project_id)
            .await;

        // Session bookkeeping reflects the validation verdict.
        self.session_manager.record(
            state,
            feature_id,
            &task.task_id,
            &dispatch.result,
            report.valid,
        );

        // Step 13: helper-agent rescue on primary failure. Only
        // non-critical classifications reach this point.
        if !report.valid {
            let helper_session = self
                .resolve_helper_session(state, feature_id)
                .await;
            let helper_result = self
                .helper
                .verify(
                    &self.dispatcher,
                    &task.task_id,
                    helper_session.as_ref(),
                    &dispatch.result.raw_output,
                    &Self::unresolved_criteria(task, &report),
                    working_directory,
                )
                .await;
            match helper_result {
                Ok(helper_outcome) => {
                    // Command outcomes ride along in the log body so the
                    // full verification trail is on disk.
                    let mut body = helper_outcome.provider_result.raw_output.clone();
                    if !helper_outcome.command_outcomes.is_empty() {
                        let outcomes: Vec<Value> = helper_outcome
                            .command_outcomes
                            .iter()
                            .map(|c| {
                                serde_json::json!({
                                    "command": c.command,
                                    "exit_code": c.exit_code,
                                    "stdout": c.stdout,
                                    "stderr": c.stderr,
                                })
                            })
                            .collect();
                        body.push_str("\n\nVerification commands:\n");
                        body.push_str(&serde_json::to_string(&outcomes).unwrap_or_default());
                    }
                    prompts
                        .append(
                            &PromptLogEntry::new(PromptLogType::HelperAgentResponse, body)
                                .with_task(&task.task_id),
                        )
                        .await?;
                    self.session_manager.record(
                        state,
                        &HelperAgentDriver::session_key(feature_id),
                        &task.task_id,
                        &helper_outcome.provider_result,
                        helper_outcome.confirmed,
                    );
                    if helper_outcome.confirmed {
                        let rule = match helper_outcome.verdict_source {
                            HelperVerdictSource::CommandsPassed => {
                                "helper_verification_commands_passed"
                            }
                            _ => "helper_agent_confirmation",
                        };
                        report.confirm(rule);
                    }
                }
                Err(e) => {
                    tracing::warn!(task_id = %task.task_id, error = %e, "Helper agent failed");
                }
            }
        }

        // Step 14: one interrogation round per attempt, flag persisted
        // first so a crash cannot duplicate it.
        let weak_confidence = report.confidence.needs_interrogation();
        if (!report.valid || halt.is_some())
            && !task.task_type.is_behavioral()
            && weak_confidence
        {
            let attempt_no = state
                .attempt_state(&task.task_id)
                .map(|a| a.retry_count)
                .unwrap_or(0);
            let already_done = state
                .attempt_state(&task.task_id)
                .is_some_and(|a| a.interrogation_attempts_done.contains(&attempt_no));
            if !already_done {
                state
                    .attempt_state_mut(&task.task_id)
                    .interrogation_attempts_done
                    .push(attempt_no);
                self.state_store.persist(state).await?;

                let unresolved = Self::unresolved_criteria(task, &report);
                if !unresolved.is_empty() {
                    let session = self.resolve_session(state, task, feature_id).await;
                    match Interrogator::interrogate(
                        &self.dispatcher,
                        task,
                        unresolved,
                        self.config.interrogation.initial_rounds,
                        session.as_ref(),
                        working_directory,
                        &self.sandbox_root,
                    )
                    .await
                    {
                        Ok(outcome) => {
                            self.log_interrogation(prompts, task, &outcome).await?;
                            if outcome.all_criteria_satisfied {
                                report.confirm("interrogation_confirmation");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(task_id = %task.task_id, error = %e, "Interrogation failed");
                        }
                    }
                }
            }
        }

        state.last_validation_report = Some(report.clone());

        Ok(AttemptOutcome {
            result: dispatch.result,
            report,
            halt,
            prompt,
        })
    }

    /// Step 18: success bookkeeping and the single post-completion SET.
    async fn complete_task(
        &self,
        state: &mut SupervisorState,
        task: &Task,
        audit: &AuditLogger,
        outcome: AttemptOutcome,
        state_before: &Value,
    ) -> SupervisorResult<()> {
        let summary = OutputParser::parse(&outcome.result.stdout)
            .ok()
            .map(|t| t.summary);

        state.supervisor.iteration += 1;
        state.supervisor.last_task_id = Some(task.task_id.clone());
        state.last_validation_report = Some(outcome.report.clone());
        state.record_completed(CompletedTask {
            task_id: task.task_id.clone(),
            completed_at: Utc::now(),
            validation_report: outcome.report.clone(),
            intent: (!task.intent.is_empty()).then(|| task.intent.clone()),
            summary,
            requires_context: None,
        });
        state.current_task = None;
        state.supervisor.resource_exhausted_retry = None;
        self.state_store.persist(state).await?;

        audit
            .append(
                &AuditEntry::new(AuditEvent::TaskComplete)
                    .with_task(&task.task_id)
                    .with_states(state_before.clone(), Self::state_digest(state))
                    .with_validation(format!(
                        "valid={} confidence={}",
                        outcome.report.valid,
                        outcome.report.confidence.as_str()
                    ))
                    .with_tool(outcome.result.provider.clone())
                    .with_prompt(&outcome.prompt)
                    .with_response(&outcome.result.raw_output),
            )
            .await?;

        tracing::info!(
            task_id = %task.task_id,
            iteration = state.supervisor.iteration,
            "Task completed"
        );
        Ok(())
    }

    /// Step 17 terminal branch: record the block and move on.
    async fn block_task(
        &self,
        state: &mut SupervisorState,
        task: &Task,
        audit: &AuditLogger,
        reason: &str,
    ) -> SupervisorResult<()> {
        state.record_blocked(&task.task_id, reason);
        state.current_task = None;
        state.supervisor.retry_task = None;
        self.state_store.persist(state).await?;

        audit
            .append(
                &AuditEntry::new(AuditEvent::TaskBlocked)
                    .with_task(&task.task_id)
                    .with_validation(reason),
            )
            .await?;

        tracing::warn!(task_id = %task.task_id, reason, "Task blocked");
        Ok(())
    }

    /// Step 6: queue exhausted; goal check or halt.
    async fn handle_exhausted_queue(
        &self,
        state: &mut SupervisorState,
        audit: &AuditLogger,
    ) -> SupervisorResult<Option<LoopExit>> {
        state.queue.exhausted = true;

        if state.goal.completed {
            return self.transition_completed(state, audit).await.map(Some);
        }

        if !self.config.goal_check.enabled {
            self.halt(
                state,
                audit,
                "TASK_LIST_EXHAUSTED_GOAL_INCOMPLETE",
                "queue exhausted with the goal incomplete and the goal check disabled",
            )
            .await?;
            return Ok(Some(LoopExit::Halted));
        }

        let project_id = Self::project_id(state);
        let prompts = PromptLogger::for_project(&self.sandbox_root, &project_id);
        let goal_task = Task::new("goal-completion-check", "assess the goal", vec![]);
        let snapshot =
            PromptBuilder::snapshot(&goal_task, state, &project_id, &self.sandbox_root);
        let prompt = PromptBuilder::goal_check(&state.goal.description, &snapshot);

        let working_directory = self.sandbox_root.join(&project_id);
        tokio::fs::create_dir_all(&working_directory)
            .await
            .map_err(|e| SupervisorError::QueueIo(e.to_string()))?;

        let dispatch = self
            .dispatcher
            .dispatch(&prompt, &working_directory, None, None, None)
            .await?;

        prompts
            .append(&PromptLogEntry::new(PromptLogType::GoalCompletionCheck, prompt))
            .await?;
        prompts
            .append(&PromptLogEntry::new(
                PromptLogType::GoalCompletionResponse,
                dispatch.result.raw_output.clone(),
            ))
            .await?;

        let verdict = OutputParser::tolerant_object(&dispatch.result.raw_output)
            .and_then(|v| v.get("goal_completed").and_then(Value::as_bool));

        match verdict {
            Some(true) => {
                state.goal.completed = true;
                self.transition_completed(state, audit).await.map(Some)
            }
            _ => {
                let reasoning = OutputParser::tolerant_object(&dispatch.result.raw_output)
                    .and_then(|v| {
                        v.get("reasoning")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "goal-completion check returned false".to_string());
                self.halt(
                    state,
                    audit,
                    "TASK_LIST_EXHAUSTED_GOAL_INCOMPLETE",
                    &reasoning,
                )
                .await?;
                Ok(Some(LoopExit::Halted))
            }
        }
    }

    async fn transition_completed(
        &self,
        state: &mut SupervisorState,
        audit: &AuditLogger,
    ) -> SupervisorResult<LoopExit> {
        state.supervisor.status = SupervisorStatus::Completed;
        self.state_store.persist(state).await?;
        audit
            .append(&AuditEntry::new(AuditEvent::Completed))
            .await?;
        tracing::info!("Goal complete; supervisor finished");
        Ok(LoopExit::Completed)
    }

    /// Step 11 RESOURCE_EXHAUSTED branch: schedule or hard-halt past the
    /// cap. The current task stays assigned so it retries after the wait.
    async fn enter_backoff(
        &self,
        state: &mut SupervisorState,
        audit: &AuditLogger,
        details: &str,
    ) -> SupervisorResult<Option<LoopExit>> {
        let attempt = state
            .supervisor
            .resource_exhausted_retry
            .as_ref()
            .map(|r| r.attempt + 1)
            .unwrap_or(1);

        let Some(delay_secs) = self.config.backoff.delay_for_attempt(attempt) else {
            self.halt(
                state,
                audit,
                "RESOURCE_EXHAUSTED",
                &format!("backoff schedule exhausted after {} attempts: {details}", attempt - 1),
            )
            .await?;
            return Ok(Some(LoopExit::Halted));
        };

        let now = Utc::now();
        state.supervisor.resource_exhausted_retry = Some(ResourceExhaustedRetry {
            attempt,
            last_attempt_at: now,
            next_retry_at: now + chrono::Duration::seconds(delay_secs as i64),
        });
        self.state_store.persist(state).await?;
        audit
            .append(
                &AuditEntry::new(AuditEvent::ResourceExhaustedRetry)
                    .with_validation(format!("attempt={attempt} delay_secs={delay_secs}")),
            )
            .await?;
        tracing::warn!(attempt, delay_secs, "Entering resource-exhausted backoff");
        Ok(None)
    }

    /// Recovery pass over freshly loaded state.
    async fn run_recovery(
        &self,
        state: &mut SupervisorState,
        audit: &AuditLogger,
    ) -> SupervisorResult<Option<LoopExit>> {
        let last_task = state.current_task.clone();
        let Some(scenario) = RecoveryDetector::detect(state, last_task.as_ref(), None) else {
            return Ok(None);
        };

        tracing::warn!(
            kind = scenario.kind.as_str(),
            details = %scenario.details,
            "Recovery scenario detected"
        );

        match scenario.action() {
            RecoveryAction::AutoReissue => {
                // current_task stays assigned; step 5 re-dispatches it.
                Ok(None)
            }
            RecoveryAction::RequireOperator => {
                if let Some(task) = last_task {
                    state.record_blocked(&task.task_id, scenario.details.clone());
                    state.current_task = None;
                }
                self.halt(state, audit, scenario.kind.as_str(), &scenario.details)
                    .await?;
                Ok(Some(LoopExit::Halted))
            }
        }
    }

    /// Operator cancel observed between iterations.
    async fn operator_cancel(&self) -> SupervisorResult<LoopExit> {
        let mut state = self.state_store.load().await?;
        let project_id = Self::project_id(&state);
        let audit = AuditLogger::for_project(&self.sandbox_root, &project_id);
        self.halt(&mut state, &audit, "OPERATOR_HALT", "cancel observed between iterations")
            .await?;
        Ok(LoopExit::Halted)
    }

    /// Terminal halt: persist first, then the audit entry.
    async fn halt(
        &self,
        state: &mut SupervisorState,
        audit: &AuditLogger,
        reason: &str,
        details: &str,
    ) -> SupervisorResult<()> {
        state.halt(reason, details);
        self.state_store.persist(state).await?;
        audit
            .append(
                &AuditEntry::new(AuditEvent::Halt)
                    .with_halt_reason(reason)
                    .with_validation(details),
            )
            .await?;
        tracing::error!(reason, details, "Supervisor halted");
        Ok(())
    }

    async fn resolve_session(
        &self,
        state: &SupervisorState,
        task: &Task,
        feature_id: &str,
    ) -> Option<SessionHandle> {
        let tag = task
            .tool
            .clone()
            .or_else(|| self.dispatcher.registry().priority().first().cloned())?;
        let provider = self.dispatcher.registry().get(&tag)?;
        self.session_manager
            .resolve(task, state, provider.as_ref(), feature_id)
            .await
            .ok()
            .flatten()
    }

    /// Helper invocations continue their own session keyed separately.
    async fn resolve_helper_session(
        &self,
        state: &SupervisorState,
        feature_id: &str,
    ) -> Option<SessionHandle> {
        let key = HelperAgentDriver::session_key(feature_id);
        state
            .supervisor
            .active_sessions
            .get(&key)
            .map(|info| SessionHandle {
                provider: info.provider.clone(),
                session_id: info.session_id.clone(),
            })
    }

    async fn log_interrogation(
        &self,
        prompts: &PromptLogger,
        task: &Task,
        outcome: &crate::services::interrogator::InterrogationOutcome,
    ) -> SupervisorResult<()> {
        for exchange in &outcome.exchanges {
            prompts
                .append(
                    &PromptLogEntry::new(
                        PromptLogType::InterrogationPrompt,
                        exchange.prompt.clone(),
                    )
                    .with_task(&task.task_id),
                )
                .await?;
            prompts
                .append(
                    &PromptLogEntry::new(
                        PromptLogType::InterrogationResponse,
                        exchange.result.raw_output.clone(),
                    )
                    .with_task(&task.task_id),
                )
                .await?;
        }
        Ok(())
    }

    fn unresolved_criteria(
        task: &Task,
        report: &crate::domain::models::ValidationReport,
    ) -> Vec<String> {
        let mut unresolved: Vec<String> = report
            .failed_criteria
            .iter()
            .chain(report.uncertain_criteria.iter())
            .cloned()
            .collect();
        if unresolved.is_empty() && !report.valid {
            // A rule failed before criteria were graded; interrogate the
            // full set.
            unresolved = task.acceptance_criteria.clone();
        }
        unresolved
    }

    fn working_directory(&self, task: &Task, project_id: &str) -> PathBuf {
        task.working_directory
            .clone()
            .unwrap_or_else(|| self.sandbox_root.join(project_id))
    }

    fn project_id(state: &SupervisorState) -> String {
        state
            .goal
            .project_id
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    /// Compact digest recorded as state_before/state_after in audit lines.
    fn state_digest(state: &SupervisorState) -> Value {
        serde_json::json!({
            "status": state.supervisor.status.as_str(),
            "iteration": state.supervisor.iteration,
            "queue_exhausted": state.queue.exhausted,
            "current_task": state.current_task.as_ref().map(|t| t.task_id.clone()),
            "completed_tasks": state.completed_tasks.len(),
            "blocked_tasks": state.blocked_tasks.len(),
        })
    }
}
