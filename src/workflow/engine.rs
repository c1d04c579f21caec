// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The workflow engine.
//!
//! Drives a thread's [`WorkflowState`] through the step graph. After every
//! step result, and strictly before the next step starts, the state is
//! checkpointed. Execution suspends only when a step asks for clarification
//! or the graph reaches `DONE`.
//!
//! A thread runs on at most one task at a time; different threads run
//! concurrently and share nothing but the checkpoint store.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::Instrument;

use super::graph::WorkflowGraph;
use super::state::{NodeState, WorkflowState, WorkflowStatus};
use crate::bridge::{cancelled, CallScope, RetryPolicy, ToolBridge};
use crate::checkpoint::{Checkpoint, CheckpointMeta, CheckpointStore};
use crate::error::{CheckpointError, ErrorKind, WorkflowError};
use crate::telemetry::{MetricsSnapshot, RunMetrics};
use crate::types::AgentStepResult;

/// One executable node of the graph.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step against the current state. Must not mutate anything the
    /// engine owns; the returned result is the only channel back.
    async fn execute(&self, state: &WorkflowState, ctx: &StepContext) -> AgentStepResult;
}

/// Per-invocation context handed to a step.
pub struct StepContext {
    pub thread_id: String,
    pub step: String,
    /// 1-based attempt number at this step.
    pub attempt: u32,
    pub cancel: watch::Receiver<bool>,
    pub metrics: Arc<RunMetrics>,
}

impl StepContext {
    /// Scope for tool calls made by this step.
    pub fn call_scope(&self) -> CallScope {
        CallScope::new(self.cancel.clone(), Arc::clone(&self.metrics))
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine-level retries of a step that failed with a retryable kind.
    pub max_step_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_retries: 3,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
        }
    }
}

/// How a run ended (or paused).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed {
        output: Option<String>,
        fields: BTreeMap<String, Value>,
    },
    Paused {
        step: String,
        questions: Vec<String>,
    },
    Failed {
        step: Option<String>,
        error_kind: ErrorKind,
        message: String,
    },
    Cancelled,
}

impl Outcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::Paused { .. } => 2,
            Self::Failed { .. } => 1,
            Self::Cancelled => 130,
        }
    }
}

/// Result of `submit`, `resume`, or `recover`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub thread_id: String,
    /// Step id of the last checkpoint written.
    pub step_id: u64,
    pub outcome: Outcome,
    pub metrics: MetricsSnapshot,
}

type ActiveThreads = Arc<Mutex<HashMap<String, watch::Sender<bool>>>>;

/// Marks a thread busy until dropped.
struct ThreadGuard {
    active: ActiveThreads,
    thread_id: String,
    cancel: watch::Receiver<bool>,
}

impl ThreadGuard {
    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.thread_id);
    }
}

/// Orchestrates steps, checkpoints, and clarification pauses.
pub struct WorkflowEngine {
    graph: WorkflowGraph,
    steps: HashMap<String, Arc<dyn StepExecutor>>,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
    active: ActiveThreads,
    bridge: Option<Arc<ToolBridge>>,
}

impl WorkflowEngine {
    pub fn builder(graph: WorkflowGraph, store: Arc<dyn CheckpointStore>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            graph,
            store,
            steps: HashMap::new(),
            config: EngineConfig::default(),
            bridge: None,
        }
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Start a workflow for `thread_id`. Same as [`submit`](Self::submit).
    pub async fn run(&self, thread_id: &str, task: &str) -> Result<RunReport, WorkflowError> {
        self.submit(thread_id, task).await
    }

    /// Start a workflow for `thread_id`.
    ///
    /// A thread whose latest run is still running or paused is rejected. A
    /// thread whose latest run finished starts over, with step ids continuing
    /// after the previous run's.
    pub async fn submit(&self, thread_id: &str, task: &str) -> Result<RunReport, WorkflowError> {
        let guard = self.acquire(thread_id)?;

        let previous = self.store.load(thread_id).await?;
        if let Some(previous) = &previous {
            if !previous.state.status.is_terminal() {
                return Err(WorkflowError::ThreadActive(thread_id.to_string()));
            }
        }

        let mut state = WorkflowState::new(thread_id, task, self.graph.first());
        state.step_counter = previous.map_or(0, |c| c.step_id) + 1;

        let metrics = Arc::new(RunMetrics::new());
        self.checkpoint(&state, &metrics).await?;
        tracing::info!(thread_id = %thread_id, first = %self.graph.first(), "Workflow submitted");

        self.drive(state, guard, metrics).await
    }

    /// Answer a paused thread's questions and re-run the paused step.
    ///
    /// Answers pair positionally with the pending questions.
    pub async fn resume(
        &self,
        thread_id: &str,
        answers: &[String],
    ) -> Result<RunReport, WorkflowError> {
        let guard = self.acquire(thread_id)?;

        let Some(latest) = self.store.load(thread_id).await? else {
            return Err(WorkflowError::NotFound(thread_id.to_string()));
        };
        let mut state = latest.state;
        if state.status != WorkflowStatus::Paused {
            return Err(WorkflowError::NotPaused(thread_id.to_string()));
        }
        if answers.len() != state.pending_questions.len() {
            return Err(WorkflowError::InvalidAnswers {
                expected: state.pending_questions.len(),
                got: answers.len(),
            });
        }

        state.answer(answers);
        state.step_counter += 1;

        let metrics = Arc::new(RunMetrics::new());
        self.checkpoint(&state, &metrics).await?;
        tracing::info!(thread_id = %thread_id, step = %state.cursor, "Workflow resumed");

        self.drive(state, guard, metrics).await
    }

    /// Pick a thread back up from its latest checkpoint after a restart.
    ///
    /// Running threads continue at their cursor step. Paused and finished
    /// threads report their recorded outcome without executing anything.
    pub async fn recover(&self, thread_id: &str) -> Result<RunReport, WorkflowError> {
        let guard = self.acquire(thread_id)?;

        let Some(latest) = self.store.load(thread_id).await? else {
            return Err(WorkflowError::NotFound(thread_id.to_string()));
        };
        let state = latest.state;
        let metrics = Arc::new(RunMetrics::new());

        if state.status == WorkflowStatus::Running {
            tracing::info!(
                thread_id = %thread_id,
                step = %state.cursor,
                step_id = state.step_counter,
                "Recovering workflow"
            );
            self.drive(state, guard, metrics).await
        } else {
            Ok(self.report(&state, &metrics))
        }
    }

    /// Recover every thread whose latest checkpoint is still running.
    pub async fn recover_all(&self) -> Result<Vec<RunReport>, WorkflowError> {
        let mut reports = Vec::new();
        for thread_id in self.store.threads().await? {
            if self.status(&thread_id).await? == Some(WorkflowStatus::Running) {
                reports.push(self.recover(&thread_id).await?);
            }
        }
        Ok(reports)
    }

    /// Status from the thread's latest checkpoint.
    pub async fn status(&self, thread_id: &str) -> Result<Option<WorkflowStatus>, WorkflowError> {
        Ok(self.store.load(thread_id).await?.map(|c| c.state.status))
    }

    /// Full state from the thread's latest checkpoint.
    pub async fn state(&self, thread_id: &str) -> Result<Option<WorkflowState>, WorkflowError> {
        Ok(self.store.load(thread_id).await?.map(|c| c.state))
    }

    /// Checkpoints recorded for the thread, oldest first.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, WorkflowError> {
        Ok(self.store.list(thread_id).await?)
    }

    /// Cancel a thread.
    ///
    /// A thread executing in this process is signalled and stops at the next
    /// opportunity. A paused or interrupted thread is marked cancelled
    /// directly. Returns `false` if the thread had already finished.
    pub async fn cancel(&self, thread_id: &str) -> Result<bool, WorkflowError> {
        {
            let active = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(signal) = active.get(thread_id) {
                signal.send_replace(true);
                tracing::info!(thread_id = %thread_id, "Cancellation requested");
                return Ok(true);
            }
        }

        let _guard = self.acquire(thread_id)?;
        let Some(latest) = self.store.load(thread_id).await? else {
            return Err(WorkflowError::NotFound(thread_id.to_string()));
        };
        if latest.state.status.is_terminal() {
            return Ok(false);
        }

        let mut state = latest.state;
        state.status = WorkflowStatus::Cancelled;
        state.step_counter += 1;
        self.checkpoint(&state, &RunMetrics::new()).await?;
        tracing::info!(thread_id = %thread_id, "Workflow cancelled");
        Ok(true)
    }

    /// Release resources held on behalf of workflows.
    pub async fn shutdown(&self) {
        if let Some(bridge) = &self.bridge {
            bridge.shutdown().await;
        }
    }

    fn acquire(&self, thread_id: &str) -> Result<ThreadGuard, WorkflowError> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.contains_key(thread_id) {
            return Err(WorkflowError::ThreadBusy(thread_id.to_string()));
        }
        let (signal, cancel) = watch::channel(false);
        active.insert(thread_id.to_string(), signal);
        Ok(ThreadGuard {
            active: Arc::clone(&self.active),
            thread_id: thread_id.to_string(),
            cancel,
        })
    }

    async fn checkpoint(
        &self,
        state: &WorkflowState,
        metrics: &RunMetrics,
    ) -> Result<(), WorkflowError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.store.save(&Checkpoint::new(state.clone())).await?;

        #[cfg(feature = "telemetry")]
        metrics.record_operation("checkpoint.save", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = metrics;

        tracing::debug!(
            thread_id = %state.thread_id,
            step_id = state.step_counter,
            status = %state.status,
            cursor = %state.cursor,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Run the thread to a terminal or paused state.
    ///
    /// A checkpoint write rejected because another process already wrote a
    /// later step (a cancel issued from another process) defers to that
    /// record if it is terminal.
    async fn drive(
        &self,
        state: WorkflowState,
        guard: ThreadGuard,
        metrics: Arc<RunMetrics>,
    ) -> Result<RunReport, WorkflowError> {
        let thread_id = state.thread_id.clone();
        match self.drive_steps(state, guard, Arc::clone(&metrics)).await {
            Err(WorkflowError::Checkpoint(err @ CheckpointError::NonMonotonic { .. })) => {
                match self.store.load(&thread_id).await? {
                    Some(latest) if latest.state.status.is_terminal() => {
                        tracing::info!(
                            thread_id = %thread_id,
                            status = %latest.state.status,
                            step_id = latest.step_id,
                            "Workflow finished elsewhere; stopping"
                        );
                        Ok(self.report(&latest.state, &metrics))
                    }
                    _ => Err(err.into()),
                }
            }
            other => other,
        }
    }

    async fn drive_steps(
        &self,
        mut state: WorkflowState,
        guard: ThreadGuard,
        metrics: Arc<RunMetrics>,
    ) -> Result<RunReport, WorkflowError> {
        let policy = RetryPolicy::new(
            self.config.max_step_retries,
            self.config.backoff_base,
            self.config.backoff_max,
        );

        loop {
            if guard.is_cancelled() {
                return self.finish_cancelled(state, &metrics).await;
            }

            let step = match &state.cursor {
                NodeState::Step { name } => name.clone(),
                NodeState::Clarifying { .. } | NodeState::Done => {
                    return Ok(self.report(&state, &metrics));
                }
            };
            let executor = self
                .steps
                .get(&step)
                .cloned()
                .ok_or_else(|| WorkflowError::UnknownStep(step.clone()))?;

            state.attempts += 1;
            let ctx = StepContext {
                thread_id: state.thread_id.clone(),
                step: step.clone(),
                attempt: state.attempts,
                cancel: guard.cancel.clone(),
                metrics: Arc::clone(&metrics),
            };
            let span = tracing::info_span!(
                "step",
                thread_id = %state.thread_id,
                step = %step,
                attempt = state.attempts
            );

            let started = Instant::now();
            let result = {
                let execution = executor.execute(&state, &ctx).instrument(span);
                tokio::select! {
                    result = execution => Some(result),
                    _ = cancelled(Some(guard.cancel.clone())) => None,
                }
            };
            let Some(result) = result else {
                return self.finish_cancelled(state, &metrics).await;
            };
            // A step that lost the race to the signal usually reports the
            // aborted tool call as a failure; cancellation wins.
            if guard.is_cancelled() {
                tracing::debug!(
                    thread_id = %state.thread_id,
                    step = %step,
                    result = result.tag(),
                    "Discarding step result after cancellation"
                );
                return self.finish_cancelled(state, &metrics).await;
            }
            let result = match result {
                AgentStepResult::NeedsClarification { questions } if questions.is_empty() => {
                    AgentStepResult::failed(
                        ErrorKind::Fatal,
                        "clarification requested without questions",
                    )
                }
                other => other,
            };

            metrics.record_step(&step, result.tag(), started.elapsed());
            state.step_counter += 1;

            match result {
                AgentStepResult::Completed {
                    output,
                    consumed_tokens,
                } => {
                    let next = self.graph.next(&step, &output)?;
                    state.apply_output(&step, &output);
                    tracing::info!(
                        thread_id = %state.thread_id,
                        step = %step,
                        consumed_tokens,
                        next = %next,
                        "Step completed"
                    );
                    if next == NodeState::Done {
                        state.status = WorkflowStatus::Completed;
                    }
                    state.cursor = next;
                    self.checkpoint(&state, &metrics).await?;
                }
                AgentStepResult::NeedsClarification { questions } => {
                    tracing::info!(
                        thread_id = %state.thread_id,
                        step = %step,
                        questions = questions.len(),
                        "Workflow paused for clarification"
                    );
                    state.pause(&step, questions);
                    self.checkpoint(&state, &metrics).await?;
                    return Ok(self.report(&state, &metrics));
                }
                AgentStepResult::Failed {
                    error_kind,
                    message,
                } => {
                    if error_kind.is_retryable() && state.attempts <= policy.max_retries {
                        tracing::warn!(
                            thread_id = %state.thread_id,
                            step = %step,
                            attempt = state.attempts,
                            error_kind = %error_kind,
                            "Step failed, retrying: {}",
                            message
                        );
                        state.record_failure(&step, error_kind, message);
                        metrics.record_step_retry(&step);
                        self.checkpoint(&state, &metrics).await?;

                        let delay = policy.delay(state.attempts - 1);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancelled(Some(guard.cancel.clone())) => {}
                        }
                        continue;
                    }

                    let (kind, message) = if error_kind.is_retryable() {
                        (
                            ErrorKind::Fatal,
                            format!(
                                "{} after {} attempts: {}",
                                error_kind, state.attempts, message
                            ),
                        )
                    } else {
                        (error_kind, message)
                    };
                    tracing::error!(
                        thread_id = %state.thread_id,
                        step = %step,
                        error_kind = %kind,
                        "Workflow failed: {}",
                        message
                    );
                    state.record_failure(&step, kind, message);
                    state.status = WorkflowStatus::Failed;
                    state.cursor = NodeState::Done;
                    self.checkpoint(&state, &metrics).await?;
                    return Ok(self.report(&state, &metrics));
                }
            }
        }
    }

    async fn finish_cancelled(
        &self,
        mut state: WorkflowState,
        metrics: &RunMetrics,
    ) -> Result<RunReport, WorkflowError> {
        state.status = WorkflowStatus::Cancelled;
        state.step_counter += 1;
        self.checkpoint(&state, metrics).await?;
        tracing::info!(thread_id = %state.thread_id, step = %state.cursor, "Workflow cancelled");
        Ok(self.report(&state, metrics))
    }

    fn report(&self, state: &WorkflowState, metrics: &RunMetrics) -> RunReport {
        let outcome = match state.status {
            WorkflowStatus::Completed => Outcome::Completed {
                output: state.final_output().map(str::to_string),
                fields: state.fields.clone(),
            },
            WorkflowStatus::Paused => Outcome::Paused {
                step: state.cursor.step_name().unwrap_or_default().to_string(),
                questions: state.pending_questions.clone(),
            },
            WorkflowStatus::Cancelled => Outcome::Cancelled,
            WorkflowStatus::Failed | WorkflowStatus::Running => match &state.last_error {
                Some(failure) if state.status == WorkflowStatus::Failed => Outcome::Failed {
                    step: Some(failure.step.clone()),
                    error_kind: failure.error_kind,
                    message: failure.message.clone(),
                },
                _ => Outcome::Failed {
                    step: state.cursor.step_name().map(str::to_string),
                    error_kind: ErrorKind::Fatal,
                    message: format!("workflow stopped while {}", state.status),
                },
            },
        };

        RunReport {
            thread_id: state.thread_id.clone(),
            step_id: state.step_counter,
            outcome,
            metrics: metrics.snapshot(),
        }
    }
}

/// Assembles a [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    graph: WorkflowGraph,
    store: Arc<dyn CheckpointStore>,
    steps: HashMap<String, Arc<dyn StepExecutor>>,
    config: EngineConfig,
    bridge: Option<Arc<ToolBridge>>,
}

impl WorkflowEngineBuilder {
    pub fn step(mut self, name: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        self.steps.insert(name.into(), executor);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Bridge whose sessions are shut down with the engine.
    pub fn bridge(mut self, bridge: Arc<ToolBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Every graph step needs an executor, and every executor a graph step.
    pub fn build(self) -> Result<WorkflowEngine, WorkflowError> {
        for step in self.graph.steps() {
            if !self.steps.contains_key(step) {
                return Err(WorkflowError::InvalidGraph(format!(
                    "no executor for step '{}'",
                    step
                )));
            }
        }
        if let Some(extra) = self.steps.keys().find(|s| !self.graph.contains(s)) {
            return Err(WorkflowError::InvalidGraph(format!(
                "executor for undeclared step '{}'",
                extra
            )));
        }

        Ok(WorkflowEngine {
            graph: self.graph,
            steps: self.steps,
            store: self.store,
            config: self.config,
            active: Arc::new(Mutex::new(HashMap::new())),
            bridge: self.bridge,
        })
    }
}
