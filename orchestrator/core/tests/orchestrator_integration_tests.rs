// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end orchestrator runs against scripted generators and judges.
//!
//! The pattern bank is the real in-memory one so reuse and storage go through
//! the same code paths as production wiring.

use async_trait::async_trait;
use crucible_core::application::factory::build_orchestrator_with;
use crucible_core::application::{
    EnsembleValidator, InferenceEngine, Orchestrator, OrchestratorError,
};
use crucible_core::domain::config::CoreConfig;
use crucible_core::domain::config::{InferenceConfig, OrchestrationConfig, ValidationConfig};
use crucible_core::domain::events::{LearningEvent, RunEvent};
use crucible_core::domain::execution::{TaskState, TaskStatus};
use crucible_core::domain::generation::{
    CodeGenerator, GeneratedCode, GenerationError, GenerationRequest,
};
use crucible_core::domain::repository::PlanRepository;
use crucible_core::domain::task::AtomicTask;
use crucible_core::domain::validation::{Judge, JudgeError, JudgeVerdict};
use crucible_core::infrastructure::event_bus::{DomainEvent, EventBus};
use crucible_core::infrastructure::plan_repository::InMemoryPlanRepository;
use crucible_cortex::{
    HashingEmbedder, Implementation, InMemoryVectorIndex, PatternBank, PatternBankError,
    PatternBankStats, PatternId, PatternMatch, SemanticTaskSignature, StandardPatternBank,
    StoredPattern,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Call {
    task: String,
    attempt: u32,
    previous_error: Option<String>,
    exemplar: Option<String>,
    dependencies: Vec<String>,
}

type Reply =
    Box<dyn Fn(&GenerationRequest) -> Result<GeneratedCode, GenerationError> + Send + Sync>;

struct MockGenerator {
    reply: Reply,
    delay: Duration,
    cancel_on_call: Option<CancellationToken>,
    calls: Mutex<Vec<Call>>,
    timeline: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockGenerator {
    fn new(
        reply: impl Fn(&GenerationRequest) -> Result<GeneratedCode, GenerationError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            delay: Duration::ZERO,
            cancel_on_call: None,
            calls: Mutex::new(Vec::new()),
            timeline: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Returns `code` for every task.
    fn constant(code: &'static str) -> Self {
        Self::new(move |_| Ok(code_of(code)))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    async fn calls_for(&self, task: &str) -> Vec<Call> {
        self.calls.lock().await.iter().filter(|c| c.task == task).cloned().collect()
    }

    async fn position(&self, entry: &str) -> usize {
        let timeline = self.timeline.lock().await;
        timeline
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {timeline:?}"))
    }
}

#[async_trait]
impl CodeGenerator for MockGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedCode, GenerationError> {
        let task = request.context.task_id().to_string();
        self.calls.lock().await.push(Call {
            task: task.clone(),
            attempt: request.context.attempt(),
            previous_error: request.context.previous_error().map(str::to_string),
            exemplar: request.exemplar().map(|e| e.code.clone()),
            dependencies: request
                .context
                .dependency_outputs()
                .keys()
                .map(|k| k.to_string())
                .collect(),
        });
        self.timeline.lock().await.push(format!("start:{task}"));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(token) = &self.cancel_on_call {
            token.cancel();
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.timeline.lock().await.push(format!("end:{task}"));
        (self.reply)(request)
    }
}

fn code_of(code: &str) -> GeneratedCode {
    GeneratedCode {
        code: code.to_string(),
        declared_dependencies: Vec::new(),
        external_library_refs: Vec::new(),
    }
}

/// Approves with `score` unless the code contains "bad".
struct CodeJudge {
    name: String,
    score: f64,
}

#[async_trait]
impl Judge for CodeJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn judge(&self, code: &str, _task_description: &str) -> Result<JudgeVerdict, JudgeError> {
        if code.contains("bad") {
            Ok(JudgeVerdict::reject(0.3, vec!["contains bad".to_string()]))
        } else {
            Ok(JudgeVerdict::approve(self.score))
        }
    }
}

fn judges(score: f64) -> Vec<Arc<dyn Judge>> {
    ["correctness", "style", "security"]
        .iter()
        .map(|name| {
            Arc::new(CodeJudge {
                name: name.to_string(),
                score,
            }) as Arc<dyn Judge>
        })
        .collect()
}

/// Delegates to a real bank but refuses every write.
struct ReadOnlyBank(StandardPatternBank);

#[async_trait]
impl PatternBank for ReadOnlyBank {
    async fn find_similar(
        &self,
        signature: &SemanticTaskSignature,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<PatternMatch>, PatternBankError> {
        self.0.find_similar(signature, threshold, limit).await
    }

    async fn store(
        &self,
        _signature: &SemanticTaskSignature,
        _implementation: &Implementation,
        _quality_score: f64,
    ) -> Result<Option<PatternId>, PatternBankError> {
        Err(PatternBankError::Write("disk full".to_string()))
    }

    async fn record_usage(&self, pattern_id: PatternId, succeeded: bool) {
        self.0.record_usage(pattern_id, succeeded).await
    }

    async fn get(&self, pattern_id: PatternId) -> Option<StoredPattern> {
        self.0.get(pattern_id).await
    }

    async fn stats(&self) -> PatternBankStats {
        self.0.stats().await
    }

    fn storage_threshold(&self) -> f64 {
        self.0.storage_threshold()
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

fn standard_bank() -> StandardPatternBank {
    StandardPatternBank::new(
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(HashingEmbedder::new()),
    )
}

fn orchestration(max_retries: u32) -> OrchestrationConfig {
    OrchestrationConfig {
        max_retries,
        max_parallel: 4,
        task_timeout: Duration::from_secs(5),
        skip_dependents_of_failed: true,
    }
}

fn assemble(
    generator: Arc<MockGenerator>,
    judges: Vec<Arc<dyn Judge>>,
    bank: Arc<dyn PatternBank>,
    config: OrchestrationConfig,
) -> Orchestrator {
    let inference = InferenceEngine::new(bank.clone(), generator, InferenceConfig::default());
    let validator = EnsembleValidator::new(judges, ValidationConfig::default()).unwrap();
    Orchestrator::new(inference, validator, bank, config)
}

fn diamond() -> Vec<AtomicTask> {
    vec![
        AtomicTask::new("A", "parse the csv file"),
        AtomicTask::new("B", "validate parsed rows").depends_on("A"),
        AtomicTask::new("C", "index parsed rows").depends_on("A"),
        AtomicTask::new("D", "render summary report").depends_on("B").depends_on("C"),
    ]
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_levels_complete_before_dependents_start() {
    let generator =
        Arc::new(MockGenerator::constant("fn ok() {}").with_delay(Duration::from_millis(20)));
    let orchestrator = assemble(
        generator.clone(),
        judges(0.9),
        Arc::new(standard_bank()),
        orchestration(3),
    );

    let report = orchestrator.run(diamond()).await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.levels.len(), 3);
    assert!(generator.position("end:A").await < generator.position("start:B").await);
    assert!(generator.position("end:A").await < generator.position("start:C").await);
    assert!(generator.position("end:B").await < generator.position("start:D").await);
    assert!(generator.position("end:C").await < generator.position("start:D").await);

    let d_calls = generator.calls_for("D").await;
    assert_eq!(d_calls[0].dependencies, vec!["B", "C"]);
    assert_eq!(
        report.record("D").unwrap().state_path(),
        vec![
            TaskState::Pending,
            TaskState::Inferring,
            TaskState::Validating,
            TaskState::Succeeded
        ]
    );
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let generator =
        Arc::new(MockGenerator::constant("fn ok() {}").with_delay(Duration::from_millis(30)));
    let mut config = orchestration(1);
    config.max_parallel = 2;
    let orchestrator = assemble(generator.clone(), judges(0.9), Arc::new(standard_bank()), config);

    let tasks = (0..6).map(|i| AtomicTask::new(format!("t{i}"), format!("step {i}"))).collect();
    let report = orchestrator.run(tasks).await.unwrap();

    assert_eq!(report.summary.succeeded_count, 6);
    let peak = generator.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency {peak}");
}

#[tokio::test]
async fn test_structural_errors_abort_before_any_work() {
    let generator = Arc::new(MockGenerator::constant("fn ok() {}"));
    let orchestrator = assemble(
        generator.clone(),
        judges(0.9),
        Arc::new(standard_bank()),
        orchestration(3),
    );

    let result = orchestrator
        .run(vec![
            AtomicTask::new("A", "first").depends_on("B"),
            AtomicTask::new("B", "second").depends_on("A"),
        ])
        .await;

    assert!(matches!(result, Err(OrchestratorError::Plan(_))));
    assert!(generator.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_zero_parallelism_is_a_configuration_error() {
    let generator = Arc::new(MockGenerator::constant("fn ok() {}"));
    let mut config = orchestration(3);
    config.max_parallel = 0;
    let orchestrator = assemble(generator, judges(0.9), Arc::new(standard_bank()), config);

    let result = orchestrator.run(vec![AtomicTask::new("A", "first")]).await;
    assert!(matches!(result, Err(OrchestratorError::Configuration(_))));
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rejected_task_fails_after_max_attempts() {
    let generator = Arc::new(MockGenerator::constant("fn bad() {}"));
    let orchestrator = assemble(
        generator.clone(),
        judges(0.9),
        Arc::new(standard_bank()),
        orchestration(3),
    );

    let report = orchestrator.run(vec![AtomicTask::new("A", "always rejected")]).await.unwrap();

    let record = report.record("A").unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert!(record.failure.as_deref().unwrap().contains("exhausted 3 attempts"));
    assert!(record.implementation.is_none());
    assert_eq!(
        record.state_path(),
        vec![
            TaskState::Pending,
            TaskState::Inferring,
            TaskState::Validating,
            TaskState::Retrying,
            TaskState::Inferring,
            TaskState::Validating,
            TaskState::Retrying,
            TaskState::Inferring,
            TaskState::Validating,
            TaskState::Failed,
        ]
    );

    let calls = generator.calls_for("A").await;
    assert_eq!(calls.iter().map(|c| c.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(calls[0].previous_error.is_none());
    for retry in &calls[1..] {
        let previous = retry.previous_error.as_deref().unwrap();
        assert!(previous.contains("validation rejected"));
        assert!(previous.contains("contains bad"));
    }
    assert_eq!(report.summary.failed_count, 1);
    assert_eq!(report.summary.total_attempts, 3);
}

#[tokio::test]
async fn test_retry_succeeds_once_feedback_is_used() {
    let generator = Arc::new(MockGenerator::new(|request| {
        if request.context.previous_error().is_some() {
            Ok(code_of("fn fixed() {}"))
        } else {
            Ok(code_of("fn bad() {}"))
        }
    }));
    let orchestrator = assemble(
        generator.clone(),
        judges(0.9),
        Arc::new(standard_bank()),
        orchestration(3),
    );

    let report = orchestrator.run(vec![AtomicTask::new("A", "needs one retry")]).await.unwrap();

    let record = report.record("A").unwrap();
    assert_eq!(record.status, TaskStatus::Succeeded);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.implementation.as_ref().unwrap().code, "fn fixed() {}");
    assert!(record.validation.as_ref().unwrap().accepted());
}

#[tokio::test]
async fn test_generator_errors_are_retried() {
    let generator = Arc::new(MockGenerator::new(|request| {
        if request.context.attempt() == 1 {
            Err(GenerationError::Provider("503 from upstream".to_string()))
        } else {
            Ok(code_of("fn ok() {}"))
        }
    }));
    let orchestrator = assemble(
        generator.clone(),
        judges(0.9),
        Arc::new(standard_bank()),
        orchestration(2),
    );

    let report = orchestrator.run(vec![AtomicTask::new("A", "flaky provider")]).await.unwrap();

    let record = report.record("A").unwrap();
    assert!(record.succeeded());
    assert_eq!(record.attempts, 2);
    let calls = generator.calls_for("A").await;
    assert!(calls[1].previous_error.as_deref().unwrap().contains("503 from upstream"));
    // Inference failure goes straight back to RETRYING.
    assert_eq!(record.state_path()[1..3], [TaskState::Inferring, TaskState::Retrying]);
}

#[tokio::test]
async fn test_attempt_timeout_counts_as_failure() {
    let generator =
        Arc::new(MockGenerator::constant("fn slow() {}").with_delay(Duration::from_secs(2)));
    let mut config = orchestration(2);
    config.task_timeout = Duration::from_millis(50);
    let orchestrator = assemble(generator, judges(0.9), Arc::new(standard_bank()), config);

    let report = orchestrator.run(vec![AtomicTask::new("A", "too slow")]).await.unwrap();

    let record = report.record("A").unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempts, 2);
    assert!(record.failure.as_deref().unwrap().contains("timed out"));
}

// ---------------------------------------------------------------------------
// Failure propagation and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dependents_of_failed_task_are_skipped() {
    let generator = Arc::new(MockGenerator::new(|request| {
        if request.context.task_id().as_str() == "A" {
            Ok(code_of("fn bad() {}"))
        } else {
            Ok(code_of("fn ok() {}"))
        }
    }));
    let orchestrator = assemble(
        generator.clone(),
        judges(0.9),
        Arc::new(standard_bank()),
        orchestration(2),
    );

    let report = orchestrator
        .run(vec![
            AtomicTask::new("A", "doomed"),
            AtomicTask::new("B", "needs A").depends_on("A"),
            AtomicTask::new("C", "independent"),
        ])
        .await
        .unwrap();

    assert_eq!(report.record("A").unwrap().status, TaskStatus::Failed);
    assert_eq!(report.record("C").unwrap().status, TaskStatus::Succeeded);

    let skipped = report.record("B").unwrap();
    assert_eq!(skipped.status, TaskStatus::Failed);
    assert_eq!(skipped.attempts, 0);
    assert!(skipped.failure.as_deref().unwrap().contains("dependency 'A' did not succeed"));
    assert_eq!(skipped.state_path(), vec![TaskState::Pending, TaskState::Failed]);
    assert!(generator.calls_for("B").await.is_empty());
    assert_eq!(report.summary.failed_count, 2);
}

#[tokio::test]
async fn test_cancellation_marks_unfinished_tasks() {
    let token = CancellationToken::new();
    let generator = Arc::new(MockGenerator::constant("fn ok() {}").cancelling(token.clone()));
    let orchestrator = assemble(
        generator.clone(),
        judges(0.9),
        Arc::new(standard_bank()),
        orchestration(3),
    );

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.run_with_cancellation(diamond(), token),
    )
    .await
    .expect("cancelled run must return promptly")
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.records.len(), 4);
    assert_eq!(report.summary.cancelled_count, 4);

    let a = report.record("A").unwrap();
    assert_eq!(a.status, TaskStatus::Cancelled);
    assert_eq!(a.attempts, 1);

    for id in ["B", "C", "D"] {
        let record = report.record(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.attempts, 0);
    }
    assert_eq!(generator.calls.lock().await.len(), 1);
}

// ---------------------------------------------------------------------------
// Learning loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stored_pattern_is_offered_as_exemplar() {
    let bank = Arc::new(standard_bank());
    let task = AtomicTask::new("slug", "convert a title into a url slug")
        .with_input("title", "String")
        .with_output("slug", "String");
    let pattern_id = bank
        .store(&task.signature(), &Implementation::new("fn slugify_v1() {}"), 0.97)
        .await
        .unwrap()
        .unwrap();

    let generator = Arc::new(MockGenerator::constant("fn slugify_v2() {}"));
    let orchestrator = assemble(generator.clone(), judges(0.9), bank.clone(), orchestration(3));

    let report = orchestrator.run(vec![task]).await.unwrap();

    let calls = generator.calls_for("slug").await;
    assert_eq!(calls[0].exemplar.as_deref(), Some("fn slugify_v1() {}"));

    let record = report.record("slug").unwrap();
    assert!(record.succeeded());
    assert_eq!(record.source_pattern, Some(pattern_id));
    assert!(record.stored_pattern.is_none());

    let stored = bank.get(pattern_id).await.unwrap();
    assert_eq!(stored.metadata.uses, 1);
    assert_eq!(stored.metadata.successes, 1);
}

#[tokio::test]
async fn test_default_wiring_adapts_result_of_previous_run() {
    let generator = Arc::new(MockGenerator::constant("fn slugify(title: &str) -> String {}"));
    let orchestrator =
        build_orchestrator_with(&CoreConfig::default(), generator.clone(), judges(0.98)).unwrap();
    let task = || {
        AtomicTask::new("slug", "convert a title into a url slug")
            .with_input("title", "String")
            .with_output("slug", "String")
    };

    let first = orchestrator.run(vec![task()]).await.unwrap();
    let stored = first.record("slug").unwrap().stored_pattern.unwrap();
    assert!(first.record("slug").unwrap().source_pattern.is_none());

    let second = orchestrator.run(vec![task()]).await.unwrap();

    let record = second.record("slug").unwrap();
    assert!(record.succeeded());
    assert_eq!(record.source_pattern, Some(stored));

    let calls = generator.calls_for("slug").await;
    assert_eq!(calls.len(), 2);
    assert!(calls[0].exemplar.is_none());
    assert_eq!(
        calls[1].exemplar.as_deref(),
        Some("fn slugify(title: &str) -> String {}")
    );

    let pattern = orchestrator.pattern_bank().get(stored).await.unwrap();
    assert_eq!(pattern.metadata.uses, 1);
    assert_eq!(pattern.metadata.successes, 1);
}

#[tokio::test]
async fn test_failed_adaptation_lowers_pattern_success_rate() {
    let bank = Arc::new(standard_bank());
    let task = AtomicTask::new("slug", "convert a title into a url slug");
    let pattern_id = bank
        .store(&task.signature(), &Implementation::new("fn slugify() {}"), 0.97)
        .await
        .unwrap()
        .unwrap();

    let generator = Arc::new(MockGenerator::constant("fn bad_adaptation() {}"));
    let orchestrator = assemble(generator, judges(0.9), bank.clone(), orchestration(2));

    let report = orchestrator.run(vec![task]).await.unwrap();

    assert_eq!(report.record("slug").unwrap().status, TaskStatus::Failed);
    let stored = bank.get(pattern_id).await.unwrap();
    assert_eq!(stored.metadata.uses, 2);
    assert_eq!(stored.metadata.successes, 0);
    assert_eq!(stored.metadata.success_rate, 0.0);
}

#[tokio::test]
async fn test_only_high_quality_results_are_stored() {
    let bank = Arc::new(standard_bank());
    let generator = Arc::new(MockGenerator::new(|request| {
        Ok(code_of(&format!("fn {}() {{}}", request.context.task_id().as_str().to_lowercase())))
    }));

    let low = assemble(generator.clone(), judges(0.9), bank.clone(), orchestration(1));
    let report = low.run(vec![AtomicTask::new("A", "mediocre result")]).await.unwrap();
    assert!(report.record("A").unwrap().succeeded());
    assert_eq!(report.summary.patterns_stored, 0);
    assert_eq!(bank.stats().await.total_patterns, 0);

    let high = assemble(generator, judges(0.98), bank.clone(), orchestration(1));
    let report = high.run(vec![AtomicTask::new("B", "excellent result")]).await.unwrap();
    let stored = report.record("B").unwrap().stored_pattern.unwrap();
    assert_eq!(report.summary.patterns_stored, 1);
    assert_eq!(bank.get(stored).await.unwrap().implementation.code, "fn b() {}");
}

#[tokio::test]
async fn test_pattern_write_failure_keeps_task_result() {
    let bank: Arc<dyn PatternBank> = Arc::new(ReadOnlyBank(standard_bank()));
    let bus = Arc::new(EventBus::with_default_capacity());
    let mut events = bus.subscribe();
    let generator = Arc::new(MockGenerator::constant("fn ok() {}"));
    let orchestrator =
        assemble(generator, judges(0.98), bank, orchestration(1)).with_event_bus(bus);

    let report = orchestrator
        .run(vec![AtomicTask::new("A", "great but unstorable")])
        .await
        .unwrap();

    let record = report.record("A").unwrap();
    assert!(record.succeeded());
    assert!(record.stored_pattern.is_none());
    assert_eq!(report.summary.pattern_write_failures, 1);
    assert!(events
        .drain()
        .iter()
        .any(|e| matches!(
            e,
            DomainEvent::Learning(LearningEvent::PatternWriteFailed { error, .. })
                if error.contains("disk full")
        )));
}

// ---------------------------------------------------------------------------
// Events and plan persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_publishes_events_and_persists_plan() {
    let bus = Arc::new(EventBus::with_default_capacity());
    let mut events = bus.subscribe();
    let plans = Arc::new(InMemoryPlanRepository::new());
    let generator = Arc::new(MockGenerator::constant("fn ok() {}"));
    let orchestrator = assemble(generator, judges(0.9), Arc::new(standard_bank()), orchestration(3))
        .with_event_bus(bus)
        .with_plan_repository(plans.clone());

    let report = orchestrator.run(diamond()).await.unwrap();

    let events = events.drain();
    assert!(events.iter().all(|e| e.run_id() == report.run_id));
    assert!(matches!(
        events.first(),
        Some(DomainEvent::Run(RunEvent::RunStarted { task_count: 4, level_count: 3, .. }))
    ));
    assert!(matches!(events.last(), Some(DomainEvent::Run(RunEvent::RunCompleted { .. }))));
    let level_completions = events
        .iter()
        .filter(|e| matches!(e, DomainEvent::Run(RunEvent::LevelCompleted { .. })))
        .count();
    assert_eq!(level_completions, 3);

    let plan = plans.find(report.run_id).await.unwrap().unwrap();
    assert_eq!(plan.levels(), report.levels.as_slice());
}
