//! C9 Workflow Engine
//!
//! Drives a [`WorkflowDefinition`] to completion: builds the dependency
//! graph once, then walks execution levels, running every ready step in a
//! level concurrently and feeding each step's output back into the run's
//! execution context before the next level is evaluated. Steps whose kind
//! requires a remote tool call go through the [`ResilientExecutor`] (C7);
//! the rest are handled locally.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::executor::{Outcome, ResilientExecutor};
use crate::reliability::{ErrorClassifier, RecoveryAction, RetryController};
use crate::registry::ClientKind;
use crate::router::TaskRouter;

use super::definition::{FailureStrategy, StepDefinition, StepKind, WorkflowDefinition};
use super::run::{StepResult, WorkflowRun, WorkflowStatus};
use super::value::Value;

/// Reverses a completed step's effect as part of a rollback. Registered per
/// [`StepKind`]; a kind with no registered handler can never appear in a
/// workflow whose `failure_strategy` is `Rollback` ([`WorkflowDefinition::validate`]
/// enforces this at definition time).
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    fn kind(&self) -> StepKind;
    async fn rollback(&self, step: &StepDefinition, output: &Value) -> Result<(), EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineRunError {
    #[error("workflow definition is invalid: {0:?}")]
    InvalidDefinition(Vec<super::definition::DefinitionError>),
    #[error("workflow run was cancelled")]
    Cancelled,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

struct ActiveRun {
    cancelled: CancellationToken,
    paused: std::sync::atomic::AtomicBool,
}

/// Maps a step to the client kind its tool call should be routed to. Steps
/// that carry an explicit target client name bypass the router; otherwise
/// the step's name and target are classified the same way a free-text task
/// description would be (C10).
fn resolve_client_kind(step: &StepDefinition) -> ClientKind {
    match step.target.as_str() {
        "filesystem" => ClientKind::Filesystem,
        "desktop" => ClientKind::Desktop,
        "system" => ClientKind::System,
        _ => {
            let classification = TaskRouter::classify(&format!("{} {}", step.name, step.target));
            TaskRouter::client_kind_for(classification.category)
        }
    }
}

pub struct WorkflowEngine {
    executor: Arc<ResilientExecutor>,
    rollback_handlers: DashMap<StepKind, Arc<dyn RollbackHandler>>,
    concurrency: Arc<Semaphore>,
    active_runs: DashMap<Uuid, Arc<ActiveRun>>,
}

impl WorkflowEngine {
    pub fn new(executor: Arc<ResilientExecutor>, max_concurrent_workflows: usize) -> Self {
        Self {
            executor,
            rollback_handlers: DashMap::new(),
            concurrency: Arc::new(Semaphore::new(max_concurrent_workflows.max(1))),
            active_runs: DashMap::new(),
        }
    }

    pub fn register_rollback_handler(&self, handler: Arc<dyn RollbackHandler>) {
        self.rollback_handlers.insert(handler.kind(), handler);
    }

    fn rollbackable_kinds(&self) -> Vec<StepKind> {
        self.rollback_handlers.iter().map(|e| *e.key()).collect()
    }

    pub fn cancel(&self, run_id: Uuid) {
        if let Some(run) = self.active_runs.get(&run_id) {
            run.cancelled.cancel();
        }
    }

    pub fn pause(&self, run_id: Uuid) {
        if let Some(run) = self.active_runs.get(&run_id) {
            run.paused.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    pub fn resume(&self, run_id: Uuid) {
        if let Some(run) = self.active_runs.get(&run_id) {
            run.paused.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[instrument(skip(self, definition, input), fields(workflow = %definition.id))]
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: BTreeMap<String, Value>,
    ) -> Result<WorkflowRun, EngineRunError> {
        let mut graph = definition
            .validate(&self.rollbackable_kinds())
            .map_err(EngineRunError::InvalidDefinition)?;
        let levels = graph
            .calculate_execution_order()
            .map_err(|e| EngineRunError::InvalidDefinition(vec![e.into()]))?;

        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("semaphore never closed");

        let mut run = WorkflowRun::new(definition.id.clone(), input);
        run.status = WorkflowStatus::Running;
        let active = Arc::new(ActiveRun {
            cancelled: CancellationToken::new(),
            paused: std::sync::atomic::AtomicBool::new(false),
        });
        self.active_runs.insert(run.id, active.clone());

        let steps_by_id: BTreeMap<&str, &StepDefinition> =
            definition.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        let deadline = Instant::now() + definition.global_timeout;
        let mut completed: Vec<String> = Vec::new();
        let mut failed = false;

        'levels: for (level_index, level) in levels.iter().enumerate() {
            run.current_level = level_index;

            while active.paused.load(std::sync::atomic::Ordering::SeqCst) {
                if active.cancelled.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            if active.cancelled.is_cancelled() || Instant::now() >= deadline {
                run.status = WorkflowStatus::Cancelled;
                break 'levels;
            }

            let succeeded: HashSet<String> = run
                .step_results
                .iter()
                .filter(|(_, r)| r.success)
                .map(|(id, _)| id.clone())
                .collect();
            let completed_set: HashSet<String> = run.step_results.keys().cloned().collect();
            let outputs: BTreeMap<String, Value> = run
                .step_results
                .iter()
                .map(|(id, r)| (id.clone(), r.output_data.clone()))
                .collect();

            let mut futures = Vec::new();
            for step_id in level {
                let Some(step) = steps_by_id.get(step_id.as_str()) else {
                    continue;
                };
                let ready = graph.is_ready(step_id, &completed_set, &succeeded, &outputs, &run.execution_context);
                if !ready {
                    run.step_results
                        .insert(step_id.clone(), StepResult::skipped(step.kind));
                    continue;
                }
                futures.push(self.run_step(step, &run.execution_context, &active.cancelled));
            }

            let results = join_all(futures).await;
            for (step_id, result) in level
                .iter()
                .filter(|id| steps_by_id.contains_key(id.as_str()) && !run.step_results.contains_key(*id))
                .zip(results)
            {
                if result.success {
                    run.execution_context
                        .insert(step_id.clone(), result.output_data.clone());
                    completed.push(step_id.clone());
                } else if definition.failure_strategy == FailureStrategy::Stop {
                    run.step_results.insert(step_id.clone(), result);
                    failed = true;
                    break;
                }
                if !run.step_results.contains_key(step_id) {
                    run.step_results.insert(step_id.clone(), result);
                }
            }

            if failed {
                break 'levels;
            }
        }

        if failed && definition.failure_strategy == FailureStrategy::Rollback {
            self.rollback(definition, &run, &completed).await;
        }

        run.status = if active.cancelled.is_cancelled() {
            WorkflowStatus::Cancelled
        } else if failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        run.completed_at = Some(chrono::Utc::now());
        self.active_runs.remove(&run.id);

        Ok(run)
    }

    async fn rollback(&self, definition: &WorkflowDefinition, run: &WorkflowRun, completed: &[String]) {
        for step_id in completed.iter().rev() {
            let Some(step) = definition.steps.iter().find(|s| &s.id == step_id) else {
                continue;
            };
            let Some(handler) = self.rollback_handlers.get(&step.kind) else {
                warn!(step = %step_id, "no rollback handler registered, skipping");
                continue;
            };
            let output = run
                .step_results
                .get(step_id)
                .map(|r| r.output_data.clone())
                .unwrap_or(Value::Null);
            if let Err(err) = handler.rollback(step, &output).await {
                error!(step = %step_id, %err, "rollback failed, continuing with remaining steps");
            }
        }
    }

    /// Execute a single step, honoring its own retry limit (the single
    /// authoritative retry counter lives inside the resilient executor's
    /// call loop for remote-routed kinds; local kinds retry here using the
    /// same classifier so the counting semantics match).
    #[instrument(skip(self, step, context, cancel), fields(step = %step.id, kind = ?step.kind))]
    async fn run_step(
        &self,
        step: &StepDefinition,
        context: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        if let Ok(Some(predicate)) = step.parsed_condition() {
            if !predicate.evaluate(context) {
                return StepResult::skipped(step.kind);
            }
        }

        let params = step.parameters.substitute(context);
        let mut attempt = 1u32;
        let max_attempts = step.retry_limit.max(1);

        let outcome = loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                result = self.dispatch(step, &params) => result,
            };
            match result {
                Ok(value) => break Ok(value),
                Err(EngineError::Cancelled) => break Err(EngineError::Cancelled),
                Err(err) => {
                    let should_retry = ErrorClassifier::should_retry(&err, attempt + 1) && attempt < max_attempts;
                    if !should_retry {
                        break Err(err);
                    }
                    let delay = RetryController::delay_for_attempt(
                        &crate::config::RetryConfig::default(),
                        attempt + 1,
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        };

        let completed_at = chrono::Utc::now();
        let execution_time = start.elapsed();

        match outcome {
            Ok(output_data) => StepResult {
                success: true,
                output_data,
                error: None,
                execution_time,
                attempts: attempt,
                kind: step.kind,
                skipped: false,
                started_at,
                completed_at,
            },
            Err(err) => StepResult {
                success: false,
                output_data: Value::Null,
                error: Some(err.to_string()),
                execution_time,
                attempts: attempt,
                kind: step.kind,
                skipped: false,
                started_at,
                completed_at,
            },
        }
    }

    async fn dispatch(&self, step: &StepDefinition, params: &Value) -> Result<Value, EngineError> {
        match step.kind {
            StepKind::Wait => {
                let secs = params.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
                tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
                Ok(Value::Null)
            }
            StepKind::Notify => {
                info!(step = %step.id, message = ?params, "workflow notification");
                Ok(Value::Null)
            }
            StepKind::Validation => {
                let ok = !matches!(params, Value::Null) && !params.is_empty();
                if ok {
                    Ok(params.clone())
                } else {
                    Err(EngineError::Validation(format!("step {} produced no data to validate", step.id)))
                }
            }
            StepKind::Transform | StepKind::Conditional | StepKind::Loop | StepKind::Custom => {
                Ok(params.clone())
            }
            StepKind::LlmQuery | StepKind::RemoteTool | StepKind::FileOp | StepKind::Shell | StepKind::UiAction
            | StepKind::ExternalCall => {
                let kind = resolve_client_kind(step);
                let raw_params = json!(params);
                let outcome = self
                    .executor
                    .invoke(kind, &step.target, &step.name, raw_params)
                    .await?;
                match outcome {
                    Outcome::Value(v) => Ok(serde_json::from_value(v).unwrap_or(Value::Null)),
                    Outcome::Degraded(degraded) => {
                        let mut map = BTreeMap::new();
                        map.insert("degraded".to_string(), Value::Bool(true));
                        map.insert("reason".to_string(), Value::String(degraded.reason));
                        Ok(Value::Map(map))
                    }
                }
            }
        }
    }
}

/// Decide whether a failed workflow run should be treated as a graceful
/// degradation instead of an outright failure (used by callers that surface
/// run results to users).
pub fn classify_run_failure(error: &EngineError) -> RecoveryAction {
    ErrorClassifier::classify(error)
}
