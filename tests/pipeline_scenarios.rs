//! End-to-end behaviour of the acquisition pipeline.
//!
//! These tests drive the public API with in-memory acquirers and sinks, so
//! they run without network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Barrier;
use tokio::time::Instant;
use uuid::Uuid;

use lead_sniper::acquisition::{Acquirer, VenueSet};
use lead_sniper::analysis::{Analyzer, EnrichmentSignals};
use lead_sniper::error::{AcquisitionError, CapabilityError};
use lead_sniper::pipeline::{
    PipelineComponents, PipelineConfig, PipelineError, PipelineOrchestrator, RunState,
};
use lead_sniper::records::{LeadIndex, LeadRecord, Payload, RawRecord};
use lead_sniper::routing::{
    BreakerConfig, CircuitState, RouteReason, RouterConfig, SmartRouter, Venue, VenueOutcome,
};
use lead_sniper::scheduler::{
    CancelSignal, RetryPolicy, SourceSpec, Task, TaskOutcome, TaskStatus, WorkerPool,
    WorkerPoolConfig,
};
use lead_sniper::sink::{MemorySink, SinkDispatcher, SinkPolicy, WriteStatus};
use lead_sniper::validation::{
    ConfidenceWeights, CrossReferenceCheck, Decision, ExternalCheck, LeadSchema, Stage,
    StaticVerifier, ValidationEngine, Verification, Verifier, DEFAULT_CATEGORIES,
};

fn listing(locator: &str) -> Payload {
    let Value::Object(map) = json!({
        "address": format!("{} Harbor Road", locator),
        "category": "foreclosure",
        "list_price": 250000.0,
        "estimated_value": 320000.0,
    }) else {
        unreachable!()
    };
    map
}

/// Sleeps briefly on every call and records the peak number of calls in flight.
struct SlowAcquirer {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowAcquirer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Acquirer for SlowAcquirer {
    fn name(&self) -> &str {
        "slow"
    }

    async fn acquire(&self, task: &Task) -> Result<Payload, AcquisitionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(listing(&task.locator))
    }
}

/// Fails the first `failures` calls for each locator, then succeeds.
struct FlakyAcquirer {
    failures: usize,
    calls: Mutex<HashMap<String, usize>>,
}

impl FlakyAcquirer {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Acquirer for FlakyAcquirer {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn acquire(&self, task: &Task) -> Result<Payload, AcquisitionError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(task.locator.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if call <= self.failures {
            return Err(AcquisitionError::Transient(format!("attempt {} failed", call)));
        }
        Ok(listing(&task.locator))
    }
}

/// Confirms every record after a fixed delay.
struct SlowVerifier(Duration);

#[async_trait]
impl Verifier for SlowVerifier {
    fn name(&self) -> &str {
        "slow-verifier"
    }

    async fn verify(&self, _record: &RawRecord) -> Result<Verification, CapabilityError> {
        tokio::time::sleep(self.0).await;
        Ok(Verification::Confirmed { score: 0.9 })
    }
}

/// Scores every lead after a fixed delay.
struct SlowAnalyzer(Duration);

#[async_trait]
impl Analyzer for SlowAnalyzer {
    fn name(&self) -> &str {
        "slow-analyzer"
    }

    async fn analyze(&self, _lead: &LeadRecord) -> Result<EnrichmentSignals, CapabilityError> {
        tokio::time::sleep(self.0).await;
        Ok(EnrichmentSignals::new(55.0))
    }
}

fn venues(acquirer: Arc<dyn Acquirer>) -> VenueSet {
    VenueSet::new(Arc::clone(&acquirer), acquirer)
}

fn pool(config: WorkerPoolConfig, acquirer: Arc<dyn Acquirer>) -> WorkerPool {
    WorkerPool::new(
        config,
        Arc::new(SmartRouter::new(RouterConfig::default())),
        venues(acquirer),
        CancelSignal::new(),
    )
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1)).with_jitter(false)
}

fn run_config(dir: &tempfile::TempDir, sources: usize) -> PipelineConfig {
    PipelineConfig::default()
        .with_min_confidence(0.5)
        .with_results_path(dir.path())
        .with_retry(fast_retry(1))
        .with_sources(
            (0..sources)
                .map(|i| SourceSpec::new(format!("src-{}", i), format!("{}", i + 1)))
                .collect(),
        )
}

fn engine(index: Arc<LeadIndex>) -> ValidationEngine {
    let categories: Vec<String> = DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect();
    ValidationEngine::new(
        LeadSchema::canonical().unwrap(),
        CrossReferenceCheck::new(index, &categories, 0.85),
        ExternalCheck::new(
            Arc::new(StaticVerifier::new(0.8)),
            fast_retry(0),
            Duration::from_secs(1),
        ),
        ConfidenceWeights::default(),
        0.5,
    )
}

#[tokio::test]
async fn scenario_a_pool_never_exceeds_worker_limit() {
    let acquirer = Arc::new(SlowAcquirer::new(Duration::from_millis(20)));
    let mut pool = pool(
        WorkerPoolConfig::new(3).with_retry(fast_retry(0)),
        acquirer.clone(),
    );
    let mut results = pool.results().unwrap();
    pool.start().unwrap();
    for i in 0..10 {
        pool.submit(Task::new("county", format!("{}", i + 1))).unwrap();
    }
    pool.close();

    let outcomes: Vec<TaskOutcome> = results.by_ref().collect().await;
    pool.shutdown().await.unwrap();

    assert_eq!(outcomes.len(), 10);
    assert!(outcomes.iter().all(|o| o.task.status.is_terminal()));
    assert!(acquirer.peak.load(Ordering::SeqCst) <= 3);
    assert!(pool.stats().peak_active_attempts <= 3);
    assert_eq!(pool.stats().tasks_succeeded, 10);
}

#[tokio::test]
async fn scenario_b_task_succeeds_on_third_attempt() {
    let mut pool = pool(
        WorkerPoolConfig::new(2).with_retry(fast_retry(3)),
        Arc::new(FlakyAcquirer::new(2)),
    );
    let mut results = pool.results().unwrap();
    pool.start().unwrap();
    pool.submit(Task::new("county", "7")).unwrap();
    pool.close();

    let outcomes: Vec<TaskOutcome> = results.by_ref().collect().await;
    pool.shutdown().await.unwrap();

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.task.status, TaskStatus::Succeeded);
    assert_eq!(outcome.task.attempts, 3);
    assert_eq!(outcome.task.routes.len(), 3);
    assert_eq!(pool.stats().retries, 2);
}

#[tokio::test]
async fn attempts_never_exceed_retry_budget() {
    let mut pool = pool(
        WorkerPoolConfig::new(2).with_retry(fast_retry(2)),
        Arc::new(FlakyAcquirer::new(usize::MAX)),
    );
    let mut results = pool.results().unwrap();
    pool.start().unwrap();
    pool.submit(Task::new("county", "9")).unwrap();
    pool.close();

    let outcomes: Vec<TaskOutcome> = results.by_ref().collect().await;
    pool.shutdown().await.unwrap();

    let outcome = &outcomes[0];
    assert_eq!(outcome.task.status, TaskStatus::Failed);
    assert_eq!(outcome.task.attempts, 3);
    assert!(matches!(
        outcome.result,
        Err(AcquisitionError::Exhausted { attempts: 3, .. })
    ));
}

#[tokio::test]
async fn scenario_c_missing_required_field_is_rejected() {
    let Value::Object(payload) = json!({ "category": "foreclosure", "list_price": 100000.0 })
    else {
        unreachable!()
    };
    let record = RawRecord::new("county", Uuid::new_v4(), Venue::Local, payload);

    let verdict = engine(Arc::new(LeadIndex::new())).validate(&record).await;

    assert_eq!(verdict.decision, Decision::Rejected);
    assert_eq!(verdict.record_id, record.id);
    let schema = verdict.stage(Stage::Schema).unwrap();
    assert!(!schema.passed);
    assert_eq!(schema.score, 0.0);
}

#[tokio::test]
async fn scenario_d_router_fails_over_until_probe_succeeds() {
    let router = SmartRouter::new(RouterConfig {
        primary: Venue::Local,
        force_venue: None,
        breaker: BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(50),
            ..BreakerConfig::default()
        },
    });
    let task = Task::new("county", "1");

    for _ in 0..5 {
        router.record(Venue::Local, VenueOutcome::Failure);
    }
    assert_eq!(router.state(Venue::Local), CircuitState::Open);

    for _ in 0..3 {
        let decision = router.route(&task);
        assert_eq!(decision.venue, Venue::Cloud);
        assert_eq!(decision.reason, RouteReason::Failover);
    }

    tokio::time::sleep(Duration::from_millis(80)).await;
    let probe = router.route(&task);
    assert_eq!(probe.venue, Venue::Local);
    assert!(probe.probe);

    // Only one probe is in flight at a time.
    assert_eq!(router.route(&task).venue, Venue::Cloud);

    router.record(Venue::Local, VenueOutcome::Success);
    assert_eq!(router.state(Venue::Local), CircuitState::Closed);
    let decision = router.route(&task);
    assert_eq!(decision.venue, Venue::Local);
    assert!(!decision.probe);
}

fn orchestrator_with_sinks(
    dir: &tempfile::TempDir,
    acquirer: Arc<dyn Acquirer>,
    primary: Arc<MemorySink>,
    secondaries: Vec<Arc<MemorySink>>,
    policy: SinkPolicy,
) -> PipelineOrchestrator {
    let components = PipelineComponents::in_memory()
        .with_venues(venues(acquirer))
        .with_primary_sink(primary)
        .with_secondary_sinks(
            secondaries
                .into_iter()
                .map(|s| s as Arc<dyn lead_sniper::sink::Sink>)
                .collect(),
        );
    PipelineOrchestrator::with_components(run_config(dir, 3).with_sink_policy(policy), components)
        .unwrap()
}

#[tokio::test]
async fn scenario_e_failed_primary_is_degraded_under_require_any() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(MemorySink::new("primary"));
    let secondary = Arc::new(MemorySink::new("archive"));
    primary.set_failing(true);
    let orchestrator = orchestrator_with_sinks(
        &dir,
        Arc::new(SlowAcquirer::new(Duration::ZERO)),
        primary.clone(),
        vec![secondary.clone()],
        SinkPolicy::RequireAny,
    );

    let config = run_config(&dir, 3).with_sink_policy(SinkPolicy::RequireAny);
    let summary = orchestrator.start_run(config).await.unwrap();

    assert_eq!(summary.state, RunState::Complete, "{:?}", summary.error);
    assert_eq!(summary.counters.stored, 3);
    assert_eq!(secondary.len(), 3);
    assert!(primary.is_empty());
    // Each lead used its full sink retry budget on the primary.
    assert_eq!(primary.attempts(), 3 * 2);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("sink primary degraded")));
}

#[tokio::test]
async fn failed_primary_fails_run_under_require_primary() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(MemorySink::new("primary"));
    let secondary = Arc::new(MemorySink::new("archive"));
    primary.set_failing(true);
    let orchestrator = orchestrator_with_sinks(
        &dir,
        Arc::new(SlowAcquirer::new(Duration::ZERO)),
        primary,
        vec![secondary],
        SinkPolicy::RequirePrimary,
    );

    let summary = orchestrator.start_run(run_config(&dir, 3)).await.unwrap();

    assert_eq!(summary.state, RunState::Failed);
    assert!(!summary.cancelled);
    assert!(summary.error.is_some());
    assert!(orchestrator.active_run().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_are_refused() {
    const CALLERS: usize = 6;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new("memory"));
    let orchestrator = orchestrator_with_sinks(
        &dir,
        Arc::new(SlowAcquirer::new(Duration::from_millis(50))),
        sink,
        Vec::new(),
        SinkPolicy::RequirePrimary,
    );

    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let barrier = Arc::clone(&barrier);
            let config = run_config(&dir, 3);
            tokio::spawn(async move {
                barrier.wait().await;
                orchestrator.start_run(config).await
            })
        })
        .collect();

    let mut completed = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(summary) => {
                assert_eq!(summary.state, RunState::Complete);
                completed += 1;
            }
            Err(PipelineError::ConcurrencyConflict { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(refused, CALLERS - 1);
    assert_eq!(orchestrator.runs().len(), 1);
    assert!(orchestrator.active_run().is_none());
}

async fn wait_for_state(orchestrator: &PipelineOrchestrator, run_id: Uuid, state: RunState) {
    let reached = async {
        while orchestrator.run(run_id).map(|s| s.state) != Some(state) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), reached)
        .await
        .unwrap_or_else(|_| panic!("run never reached {state}"));
}

#[tokio::test]
async fn cancel_during_validation_ends_run_within_grace() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new("memory"));
    let components = PipelineComponents::in_memory()
        .with_venues(venues(Arc::new(SlowAcquirer::new(Duration::ZERO))))
        .with_verifier(Arc::new(SlowVerifier(Duration::from_millis(400))))
        .with_primary_sink(sink.clone());
    let mut config = run_config(&dir, 64).with_cancel_grace(Duration::from_millis(50));
    config.max_parallel_validation = 1;
    let orchestrator = PipelineOrchestrator::with_components(config.clone(), components).unwrap();
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.trigger(config).unwrap();
    wait_for_state(&orchestrator, handle.run_id, RunState::Validating).await;

    let cancelled_at = Instant::now();
    assert!(orchestrator.cancel(handle.run_id));
    let summary = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("run did not end after cancellation")
        .unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.run_id, handle.run_id);
    assert_eq!(summary.state, RunState::Failed);
    assert!(summary.cancelled);
    assert!(summary.counters.validated < 64);
    assert!(sink.is_empty());
    assert!(orchestrator.active_run().is_none());
}

#[tokio::test]
async fn cancel_during_analysis_ends_run_within_grace() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new("memory"));
    let components = PipelineComponents::in_memory()
        .with_venues(venues(Arc::new(SlowAcquirer::new(Duration::ZERO))))
        .with_analyzer(Arc::new(SlowAnalyzer(Duration::from_millis(400))))
        .with_primary_sink(sink.clone());
    let mut config = run_config(&dir, 16).with_cancel_grace(Duration::from_millis(50));
    config.max_parallel_analysis = 1;
    let orchestrator = PipelineOrchestrator::with_components(config.clone(), components).unwrap();
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.trigger(config).unwrap();
    wait_for_state(&orchestrator, handle.run_id, RunState::Analyzing).await;

    let cancelled_at = Instant::now();
    assert!(orchestrator.cancel(handle.run_id));
    let summary = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("run did not end after cancellation")
        .unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.state, RunState::Failed);
    assert!(summary.cancelled);
    assert!(summary.counters.analyzed < 16);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn stored_leads_trace_back_to_verdict_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new("memory"));
    let orchestrator = orchestrator_with_sinks(
        &dir,
        Arc::new(SlowAcquirer::new(Duration::ZERO)),
        sink.clone(),
        Vec::new(),
        SinkPolicy::RequirePrimary,
    );

    let summary = orchestrator.start_run(run_config(&dir, 3)).await.unwrap();
    assert_eq!(summary.state, RunState::Complete);

    let leads = sink.leads();
    assert_eq!(leads.len(), 3);
    for lead in &leads {
        assert!(!lead.verdict_id.is_nil());
        assert!(!lead.record_id.is_nil());
        assert!(lead.confidence >= 0.5);
        assert!(lead.predictive_score.is_some());
    }

    let csv_path = dir
        .path()
        .join("exports")
        .join(format!("leads_{}.csv", summary.run_id));
    let csv = std::fs::read_to_string(csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 1 + leads.len());
    assert!(lines[0].split(',').any(|c| c == "fields_address"));
    assert!(lines[0].split(',').any(|c| c == "enrichment_priority"));
}

#[tokio::test]
async fn persisting_the_same_lead_twice_is_idempotent() {
    let index = Arc::new(LeadIndex::new());
    let record = RawRecord::new("county", Uuid::new_v4(), Venue::Local, listing("12"));
    let verdict = engine(index).validate(&record).await;
    assert_eq!(verdict.decision, Decision::Accepted);
    let lead = LeadRecord::from_accepted(&record, &verdict).unwrap();

    let sink = Arc::new(MemorySink::new("memory"));
    let dispatcher = SinkDispatcher::new(
        sink.clone(),
        Vec::new(),
        SinkPolicy::RequirePrimary,
        fast_retry(1),
        Duration::from_secs(1),
    );

    let first = dispatcher.persist(&lead).await.unwrap();
    let second = dispatcher.persist(&lead).await.unwrap();

    assert_eq!(first.status, WriteStatus::Stored);
    assert_eq!(second.status, WriteStatus::AlreadyPresent);
    assert_eq!(first.lead_id, second.lead_id);
    assert_eq!(sink.len(), 1);
}
