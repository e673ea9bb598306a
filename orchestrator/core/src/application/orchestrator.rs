// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator
//!
//! Drives a task list through the leveled plan produced by [`DagBuilder`]:
//!
//! 1. Build and (optionally) persist the DAG. Structural errors abort the run.
//! 2. Run levels strictly in order. Every task of a level is spawned onto a
//!    [`JoinSet`] and the whole set is drained before the next level starts.
//!    A [`Semaphore`] bounds how many tasks of a level call out at once.
//! 3. Each task runs its own bounded state machine:
//!    `PENDING -> INFERRING -> VALIDATING -> SUCCEEDED`, looping through
//!    `RETRYING` with a fresh [`InferenceContext`] that carries the previous
//!    failure, until `max_retries` attempts are spent.
//! 4. On success the implementation is offered to the pattern bank, and the
//!    adapted source pattern (if any) gets its usage recorded.
//!
//! Per-task failures never leave their task. A cancelled run keeps every
//! record produced so far; unfinished and unstarted tasks end `CANCELLED`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use crucible_cortex::{Implementation, PatternBank, PatternId, SemanticTaskSignature};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::inference::{Inference, InferenceEngine, InferenceSource};
use crate::application::validation_service::EnsembleValidator;
use crate::domain::config::OrchestrationConfig;
use crate::domain::dag::{Dag, DagBuilder, DagError};
use crate::domain::events::{LearningEvent, RunEvent, TaskEvent};
use crate::domain::execution::{
    RunId, RunReport, RunSummary, StateTransition, TaskRecord, TaskState, TaskStatus,
};
use crate::domain::generation::{DependencyOutput, InferenceContext};
use crate::domain::repository::PlanRepository;
use crate::domain::task::{AtomicTask, TaskId};
use crate::domain::validation::ValidationResult;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("cannot plan run: {0}")]
    Plan(#[from] DagError),

    #[error("invalid orchestration configuration: {0}")]
    Configuration(String),
}

pub struct Orchestrator {
    inference: Arc<InferenceEngine>,
    validator: Arc<EnsembleValidator>,
    pattern_bank: Arc<dyn PatternBank>,
    config: OrchestrationConfig,
    event_bus: Option<Arc<EventBus>>,
    plan_repository: Option<Arc<dyn PlanRepository>>,
}

impl Orchestrator {
    pub fn new(
        inference: InferenceEngine,
        validator: EnsembleValidator,
        pattern_bank: Arc<dyn PatternBank>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            inference: Arc::new(inference),
            validator: Arc::new(validator),
            pattern_bank,
            config,
            event_bus: None,
            plan_repository: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_plan_repository(mut self, repository: Arc<dyn PlanRepository>) -> Self {
        self.plan_repository = Some(repository);
        self
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn pattern_bank(&self) -> &Arc<dyn PatternBank> {
        &self.pattern_bank
    }

    pub async fn run(&self, tasks: Vec<AtomicTask>) -> Result<RunReport, OrchestratorError> {
        self.run_with_cancellation(tasks, CancellationToken::new()).await
    }

    /// Execute `tasks`, stopping early once `cancel` fires.
    pub async fn run_with_cancellation(
        &self,
        tasks: Vec<AtomicTask>,
        cancel: CancellationToken,
    ) -> Result<RunReport, OrchestratorError> {
        if self.config.max_parallel == 0 {
            return Err(OrchestratorError::Configuration(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.config.max_retries == 0 {
            return Err(OrchestratorError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let dag = DagBuilder::build(tasks)?;
        let run_id = RunId::new();
        let started_at = Utc::now();

        for warning in dag.warnings() {
            warn!(run_id = %run_id, "{}", warning);
        }

        if let Some(repository) = &self.plan_repository {
            if let Err(e) = repository.save(run_id, &dag).await {
                warn!(
                    run_id = %run_id,
                    error = %e,
                    "Failed to persist plan, continuing without it"
                );
            }
        }

        info!(
            run_id = %run_id,
            tasks = dag.len(),
            levels = dag.levels().len(),
            max_parallel = self.config.max_parallel,
            "Starting run"
        );
        self.publish_run(RunEvent::RunStarted {
            run_id,
            task_count: dag.len(),
            level_count: dag.levels().len(),
            started_at,
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut records: BTreeMap<TaskId, TaskRecord> = BTreeMap::new();
        let mut outputs: BTreeMap<TaskId, DependencyOutput> = BTreeMap::new();
        let mut summary = RunSummary::default();
        let mut cancelled = false;

        for (level_index, level) in dag.levels().iter().enumerate() {
            if cancel.is_cancelled() {
                self.cancel_remaining(run_id, &dag, level_index, &mut records, &mut summary);
                cancelled = true;
                break;
            }

            let level_started = Instant::now();
            info!(run_id = %run_id, level = level_index, tasks = level.len(), "Starting level");
            self.publish_run(RunEvent::LevelStarted {
                run_id,
                level: level_index,
                tasks: level.iter().cloned().collect(),
            });

            let mut join_set = JoinSet::new();
            let mut spawned = BTreeSet::new();

            for task_id in level {
                let Some(task) = dag.task(task_id) else {
                    continue;
                };

                let unmet = task
                    .dependencies
                    .iter()
                    .find(|dep| !records.get(*dep).is_some_and(TaskRecord::succeeded));
                if let (Some(dep), true) = (unmet, self.config.skip_dependents_of_failed) {
                    let record = self.runner(run_id).skip(task, dep);
                    summary.record(&record);
                    records.insert(task.id.clone(), record);
                    continue;
                }

                let dependency_outputs: BTreeMap<TaskId, DependencyOutput> = task
                    .dependencies
                    .iter()
                    .filter_map(|dep| outputs.get(dep).map(|o| (dep.clone(), o.clone())))
                    .collect();

                let runner = self.runner(run_id);
                let task = task.clone();
                let semaphore = semaphore.clone();
                let cancel = cancel.clone();
                spawned.insert(task.id.clone());
                join_set.spawn(async move {
                    runner
                        .run_task(task, dependency_outputs, semaphore, cancel)
                        .await
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(
                            run_id = %run_id,
                            level = level_index,
                            error = %e,
                            "Task runner aborted"
                        );
                        continue;
                    }
                };
                spawned.remove(&outcome.record.task_id);
                if outcome.pattern_write_failed {
                    summary.pattern_write_failures += 1;
                }
                if outcome.record.stored_pattern.is_some() {
                    summary.patterns_stored += 1;
                }
                if let (Some(implementation), Some(task)) =
                    (&outcome.record.implementation, dag.task(&outcome.record.task_id))
                {
                    outputs.insert(
                        task.id.clone(),
                        DependencyOutput {
                            purpose: task.purpose.clone(),
                            outputs: task.outputs.clone(),
                            code: implementation.code.clone(),
                        },
                    );
                }
                summary.record(&outcome.record);
                records.insert(outcome.record.task_id.clone(), outcome.record);
            }

            // A runner that panicked produced no record.
            for task_id in spawned {
                let record = TaskRecord {
                    task_id: task_id.clone(),
                    status: TaskStatus::Failed,
                    implementation: None,
                    validation: None,
                    attempts: 0,
                    failure: Some("task runner aborted".to_string()),
                    source_pattern: None,
                    stored_pattern: None,
                    transitions: Vec::new(),
                };
                summary.record(&record);
                records.insert(task_id, record);
            }

            let (succeeded, failed) =
                level
                    .iter()
                    .fold((0, 0), |(s, f), id| match records.get(id).map(|r| r.status) {
                        Some(TaskStatus::Succeeded) => (s + 1, f),
                        Some(TaskStatus::Failed) => (s, f + 1),
                        _ => (s, f),
                    });
            let elapsed = level_started.elapsed();
            metrics::histogram!("crucible_level_duration_seconds").record(elapsed.as_secs_f64());
            info!(
                run_id = %run_id,
                level = level_index,
                succeeded,
                failed,
                duration_ms = elapsed.as_millis() as u64,
                "Level complete"
            );
            self.publish_run(RunEvent::LevelCompleted {
                run_id,
                level: level_index,
                succeeded,
                failed,
                duration_ms: elapsed.as_millis() as u64,
            });

            if cancel.is_cancelled() {
                self.cancel_remaining(run_id, &dag, level_index + 1, &mut records, &mut summary);
                cancelled = true;
                break;
            }
        }

        for record in records.values() {
            metrics::counter!("crucible_tasks_total", "status" => record.status.as_str())
                .increment(1);
        }

        let finished_at = Utc::now();
        info!(
            run_id = %run_id,
            succeeded = summary.succeeded_count,
            failed = summary.failed_count,
            cancelled = summary.cancelled_count,
            patterns_stored = summary.patterns_stored,
            pattern_write_failures = summary.pattern_write_failures,
            "Run complete"
        );
        self.publish_run(RunEvent::RunCompleted {
            run_id,
            summary: summary.clone(),
            completed_at: finished_at,
        });

        Ok(RunReport {
            run_id,
            levels: dag.levels().to_vec(),
            records,
            summary,
            cancelled,
            started_at,
            finished_at,
        })
    }

    /// Mark every task from `from_level` on as cancelled without running it.
    fn cancel_remaining(
        &self,
        run_id: RunId,
        dag: &Dag,
        from_level: usize,
        records: &mut BTreeMap<TaskId, TaskRecord>,
        summary: &mut RunSummary,
    ) {
        warn!(run_id = %run_id, level = from_level, "Run cancelled");
        self.publish_run(RunEvent::RunCancelled {
            run_id,
            level: from_level,
            cancelled_at: Utc::now(),
        });
        for level in dag.levels().iter().skip(from_level) {
            for task_id in level {
                if records.contains_key(task_id) {
                    continue;
                }
                let record =
                    StateTracker::new(run_id, task_id.clone(), self.event_bus.clone()).cancel();
                summary.record(&record);
                records.insert(task_id.clone(), record);
            }
        }
    }

    fn runner(&self, run_id: RunId) -> TaskRunner {
        TaskRunner {
            run_id,
            inference: self.inference.clone(),
            validator: self.validator.clone(),
            pattern_bank: self.pattern_bank.clone(),
            config: self.config.clone(),
            event_bus: self.event_bus.clone(),
        }
    }

    fn publish_run(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_run_event(event);
        }
    }
}

struct TaskOutcome {
    record: TaskRecord,
    pattern_write_failed: bool,
}

impl From<TaskRecord> for TaskOutcome {
    fn from(record: TaskRecord) -> Self {
        Self {
            record,
            pattern_write_failed: false,
        }
    }
}

/// Records transitions for one task and turns them into its final record.
struct StateTracker {
    run_id: RunId,
    task_id: TaskId,
    state: TaskState,
    attempts: u32,
    transitions: Vec<StateTransition>,
    last_validation: Option<ValidationResult>,
    source_pattern: Option<PatternId>,
    event_bus: Option<Arc<EventBus>>,
}

impl StateTracker {
    fn new(run_id: RunId, task_id: TaskId, event_bus: Option<Arc<EventBus>>) -> Self {
        Self {
            run_id,
            task_id,
            state: TaskState::Pending,
            attempts: 0,
            transitions: Vec::new(),
            last_validation: None,
            source_pattern: None,
            event_bus,
        }
    }

    fn transition(&mut self, to: TaskState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal transition {} -> {}",
            self.state,
            to
        );
        debug!(
            task_id = %self.task_id,
            from = %self.state,
            to = %to,
            attempt = self.attempts,
            "Task state change"
        );
        self.transitions.push(StateTransition {
            from: self.state,
            to,
            attempt: self.attempts,
            at: Utc::now(),
        });
        if let Some(bus) = &self.event_bus {
            bus.publish_task_event(TaskEvent::StateChanged {
                run_id: self.run_id,
                task_id: self.task_id.clone(),
                from: self.state,
                to,
                attempt: self.attempts,
            });
        }
        self.state = to;
    }

    fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        metrics::counter!("crucible_task_attempts_total").increment(1);
        self.transition(TaskState::Inferring);
        self.attempts
    }

    fn succeed(
        mut self,
        implementation: Implementation,
        stored_pattern: Option<PatternId>,
    ) -> TaskRecord {
        self.transition(TaskState::Succeeded);
        self.into_record(TaskStatus::Succeeded, Some(implementation), None, stored_pattern)
    }

    fn fail(mut self, reason: String) -> TaskRecord {
        self.transition(TaskState::Failed);
        self.into_record(TaskStatus::Failed, None, Some(reason), None)
    }

    fn cancel(mut self) -> TaskRecord {
        self.transition(TaskState::Cancelled);
        self.into_record(TaskStatus::Cancelled, None, Some("run cancelled".to_string()), None)
    }

    fn into_record(
        self,
        status: TaskStatus,
        implementation: Option<Implementation>,
        failure: Option<String>,
        stored_pattern: Option<PatternId>,
    ) -> TaskRecord {
        TaskRecord {
            task_id: self.task_id,
            status,
            implementation,
            validation: self.last_validation,
            attempts: self.attempts,
            failure,
            source_pattern: self.source_pattern,
            stored_pattern,
            transitions: self.transitions,
        }
    }
}

/// Everything one spawned task needs, cheaply cloned per task.
struct TaskRunner {
    run_id: RunId,
    inference: Arc<InferenceEngine>,
    validator: Arc<EnsembleValidator>,
    pattern_bank: Arc<dyn PatternBank>,
    config: OrchestrationConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl TaskRunner {
    fn tracker(&self, task_id: TaskId) -> StateTracker {
        StateTracker::new(self.run_id, task_id, self.event_bus.clone())
    }

    fn skip(&self, task: &AtomicTask, dependency: &TaskId) -> TaskRecord {
        info!(
            run_id = %self.run_id,
            task_id = %task.id,
            dependency = %dependency,
            "Skipping task, dependency did not succeed"
        );
        self.tracker(task.id.clone())
            .fail(format!("dependency '{dependency}' did not succeed"))
    }

    async fn run_task(
        self,
        task: AtomicTask,
        dependency_outputs: BTreeMap<TaskId, DependencyOutput>,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        let mut tracker = self.tracker(task.id.clone());

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return tracker.cancel().into(),
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return tracker.cancel().into(),
            },
        };

        let signature = task.signature();
        let mut context = InferenceContext::for_task(&task, dependency_outputs);
        let max_attempts = self.config.max_retries;
        let task_timeout = self.config.task_timeout;

        loop {
            let attempt = tracker.begin_attempt();
            let deadline = tokio::time::Instant::now() + task_timeout;

            let inferred = tokio::select! {
                biased;
                _ = cancel.cancelled() => return tracker.cancel().into(),
                result = tokio::time::timeout_at(
                    deadline,
                    self.inference.infer(&signature, &context),
                ) => result,
            };

            let failure = match inferred {
                Err(_) => format!("attempt timed out after {task_timeout:?} during inference"),
                Ok(Err(e)) => e.to_string(),
                Ok(Ok(inference)) => {
                    tracker.source_pattern = inference.source_pattern();
                    if let InferenceSource::Adapted { pattern_id, score } = inference.source {
                        self.publish_learning(LearningEvent::PatternReused {
                            run_id: self.run_id,
                            task_id: task.id.clone(),
                            pattern_id,
                            score,
                        });
                    }

                    tracker.transition(TaskState::Validating);
                    let validated = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return tracker.cancel().into(),
                        result = tokio::time::timeout_at(
                            deadline,
                            self.validator.validate(&inference.implementation, &task),
                        ) => result,
                    };

                    match validated {
                        Ok(result) if result.accepted() => {
                            return self
                                .finish_success(&task, &signature, inference, result, tracker)
                                .await;
                        }
                        Ok(result) => {
                            let feedback = result.feedback();
                            tracker.last_validation = Some(result);
                            self.record_adapted_failure(&inference).await;
                            feedback
                        }
                        Err(_) => {
                            self.record_adapted_failure(&inference).await;
                            format!("attempt timed out after {task_timeout:?} during validation")
                        }
                    }
                }
            };

            warn!(
                run_id = %self.run_id,
                task_id = %task.id,
                attempt,
                max_attempts,
                reason = %failure,
                "Attempt failed"
            );
            self.publish_task(TaskEvent::AttemptFailed {
                run_id: self.run_id,
                task_id: task.id.clone(),
                attempt,
                reason: failure.clone(),
            });

            if attempt >= max_attempts {
                return tracker
                    .fail(format!("exhausted {max_attempts} attempts; last failure: {failure}"))
                    .into();
            }

            tracker.transition(TaskState::Retrying);
            context = context.with_retry(failure);
        }
    }

    async fn finish_success(
        &self,
        task: &AtomicTask,
        signature: &SemanticTaskSignature,
        inference: Inference,
        validation: ValidationResult,
        mut tracker: StateTracker,
    ) -> TaskOutcome {
        let quality = validation.score;
        tracker.last_validation = Some(validation);

        if let Some(pattern_id) = inference.source_pattern() {
            self.pattern_bank.record_usage(pattern_id, true).await;
        }

        let mut pattern_write_failed = false;
        let stored_pattern = if quality >= self.pattern_bank.storage_threshold() {
            match self
                .pattern_bank
                .store(signature, &inference.implementation, quality)
                .await
            {
                Ok(Some(pattern_id)) => {
                    metrics::counter!("crucible_patterns_stored_total").increment(1);
                    self.publish_learning(LearningEvent::PatternStored {
                        run_id: self.run_id,
                        task_id: task.id.clone(),
                        pattern_id,
                        quality_score: quality,
                    });
                    Some(pattern_id)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(
                        run_id = %self.run_id,
                        task_id = %task.id,
                        error = %e,
                        "Failed to store pattern, task result kept"
                    );
                    metrics::counter!("crucible_pattern_write_failures_total").increment(1);
                    self.publish_learning(LearningEvent::PatternWriteFailed {
                        run_id: self.run_id,
                        task_id: task.id.clone(),
                        error: e.to_string(),
                    });
                    pattern_write_failed = true;
                    None
                }
            }
        } else {
            debug!(
                task_id = %task.id,
                quality,
                threshold = self.pattern_bank.storage_threshold(),
                "Quality below storage threshold, not storing"
            );
            None
        };

        info!(
            run_id = %self.run_id,
            task_id = %task.id,
            attempts = tracker.attempts,
            quality,
            reused = inference.source_pattern().is_some(),
            "Task succeeded"
        );

        TaskOutcome {
            record: tracker.succeed(inference.implementation, stored_pattern),
            pattern_write_failed,
        }
    }

    async fn record_adapted_failure(&self, inference: &Inference) {
        if let Some(pattern_id) = inference.source_pattern() {
            self.pattern_bank.record_usage(pattern_id, false).await;
        }
    }

    fn publish_task(&self, event: TaskEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_task_event(event);
        }
    }

    fn publish_learning(&self, event: LearningEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_learning_event(event);
        }
    }
}
