//! Pipeline orchestrator.
//!
//! Drives one run at a time through
//! `INIT → SCRAPING → VALIDATING → ANALYZING → STORING → REPORTING → COMPLETE`:
//! - Acquisition through the worker pool and smart router
//! - Three-stage validation with re-passes for transiently quarantined records
//! - Analysis of accepted leads
//! - Deduplicated persistence through the sink dispatcher
//! - A JSON run report
//!
//! Each stage drains completely before the next begins. An unrecoverable
//! error moves the run to `FAILED`; leads already persisted stay persisted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::components::PipelineComponents;
use super::config::{ConfigError, PipelineConfig};
use super::export;
use super::gate::{LeaseGuard, RunGate};
use super::progress::{ProgressMonitor, RunCounters};
use super::report::RunReport;
use super::run::{PipelineRun, RunHandle, RunRegistry, RunSummary};
use super::state::RunState;
use crate::analysis::{AnalysisError, AnalysisStage};
use crate::error::SinkError;
use crate::metrics::MetricsCollector;
use crate::records::{LeadIndex, LeadRecord, LeadStatus, RawRecord};
use crate::routing::SmartRouter;
use crate::scheduler::{CancelSignal, PoolError, RetryPolicy, Task, WorkerPool, WorkerPoolConfig};
use crate::sink::{QuarantineEntry, SinkDispatcher, WriteStatus};
use crate::validation::{
    CrossReferenceCheck, Decision, ExternalCheck, LeadSchema, ValidationEngine, ValidationVerdict,
};

/// Capacity of the run summary broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another run holds the run gate.
    #[error("Run {active_run} is already in progress")]
    ConcurrencyConflict { active_run: Uuid },

    /// The run was started without sources.
    #[error("No sources configured for the run")]
    NoSources,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker pool error.
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Run-fatal sink failure.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Every analysis in the stage failed.
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// The run was cancelled.
    #[error("Run cancelled during {0}")]
    Cancelled(RunState),

    /// Building the pipeline's capabilities failed.
    #[error("Setup failed: {0}")]
    Setup(String),
}

/// A run that holds the gate and is ready to execute.
struct PreparedRun {
    run: PipelineRun,
    lease: LeaseGuard,
    config: PipelineConfig,
    cancel: CancelSignal,
}

struct OrchestratorInner {
    config: PipelineConfig,
    components: PipelineComponents,
    schema: LeadSchema,
    router: Arc<SmartRouter>,
    gate: Arc<RunGate>,
    registry: RunRegistry,
    events: broadcast::Sender<RunSummary>,
    active: Mutex<Option<(Uuid, CancelSignal)>>,
    metrics: MetricsCollector,
}

/// Coordinates pipeline runs.
///
/// Cheap to clone; clones share the run gate, router health and run history.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator, building its capabilities from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a capability
    /// cannot be built.
    pub async fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let components = PipelineComponents::build(&config).await?;
        Self::with_components(config, components)
    }

    /// Creates an orchestrator over the given capabilities.
    pub fn with_components(
        config: PipelineConfig,
        components: PipelineComponents,
    ) -> Result<Self, PipelineError> {
        let schema = LeadSchema::canonical()
            .map_err(|e| PipelineError::Setup(format!("lead schema: {}", e)))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            components = ?components,
            primary_venue = %config.router.primary,
            sink_policy = %config.sink_policy,
            "Pipeline orchestrator created"
        );

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                router: Arc::new(SmartRouter::new(config.router.clone())),
                gate: Arc::new(RunGate::new(config.lease_ttl)),
                registry: RunRegistry::new(config.run_history),
                config,
                components,
                schema,
                events,
                active: Mutex::new(None),
                metrics: MetricsCollector::new(),
            }),
        })
    }

    /// Base configuration runs are derived from.
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &Arc<SmartRouter> {
        &self.inner.router
    }

    /// Receives the final summary of every run.
    pub fn subscribe(&self) -> broadcast::Receiver<RunSummary> {
        self.inner.events.subscribe()
    }

    /// Retained runs, newest first.
    pub fn runs(&self) -> Vec<RunSummary> {
        self.inner.registry.list()
    }

    pub fn run(&self, run_id: Uuid) -> Option<RunSummary> {
        self.inner.registry.get(run_id)
    }

    pub fn active_run(&self) -> Option<RunSummary> {
        self.inner.registry.active()
    }

    /// Requests cancellation of a live run. Returns `false` if `run_id` is
    /// not the active run.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.active_lock().as_ref() {
            Some((active, signal)) if *active == run_id => {
                info!(run_id = %run_id, "Run cancellation requested");
                signal.cancel();
                true
            }
            _ => false,
        }
    }

    /// Runs the pipeline to a terminal state and returns its summary.
    ///
    /// Failures inside the run are reported through the summary's state and
    /// error.
    ///
    /// # Errors
    ///
    /// Refuses to start with `ConcurrencyConflict` if another run is live,
    /// `NoSources` if `config.sources` is empty, or `Config` if the
    /// configuration is invalid.
    pub async fn start_run(&self, config: PipelineConfig) -> Result<RunSummary, PipelineError> {
        let prepared = self.prepare(config)?;
        Ok(self.execute(prepared).await)
    }

    /// Starts a run in the background and returns its id without waiting.
    ///
    /// # Errors
    ///
    /// Same refusals as [`start_run`](Self::start_run).
    pub fn trigger(&self, config: PipelineConfig) -> Result<RunHandle, PipelineError> {
        let prepared = self.prepare(config)?;
        let handle = RunHandle {
            run_id: prepared.run.run_id,
        };
        let this = self.clone();
        tokio::spawn(async move {
            this.execute(prepared).await;
        });
        Ok(handle)
    }

    fn active_lock(&self) -> MutexGuard<'_, Option<(Uuid, CancelSignal)>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn prepare(&self, config: PipelineConfig) -> Result<PreparedRun, PipelineError> {
        if config.sources.is_empty() {
            return Err(PipelineError::NoSources);
        }
        config.validate()?;

        let run_id = Uuid::new_v4();
        let lease = self.inner.gate.acquire(run_id).map_err(|active_run| {
            info!(run_id = %run_id, active_run = %active_run, "Run refused, another run is live");
            PipelineError::ConcurrencyConflict { active_run }
        })?;

        let run = PipelineRun::new(run_id);
        let cancel = CancelSignal::new();
        *self.active_lock() = Some((run_id, cancel.clone()));
        self.inner.registry.upsert(run.summary());

        info!(
            run_id = %run_id,
            sources = config.sources.len(),
            max_parallel_workers = config.max_parallel_workers,
            "Run registered"
        );
        Ok(PreparedRun {
            run,
            lease,
            config,
            cancel,
        })
    }

    async fn execute(&self, prepared: PreparedRun) -> RunSummary {
        let PreparedRun {
            mut run,
            lease,
            config,
            cancel,
        } = prepared;
        let started = Instant::now();
        let heartbeat = lease.heartbeat();
        let monitor = ProgressMonitor::start(
            run.run_id,
            run.counters.clone(),
            config.sources.len(),
            config.progress_interval,
        );

        if let Err(e) = self.drive(&mut run, &config, &cancel).await {
            let cancelled = matches!(e, PipelineError::Cancelled(_));
            run.fail(e, cancelled);
        }

        monitor.stop().await;
        heartbeat.stop();

        let summary = run.summary();
        let elapsed = started.elapsed().as_secs_f64();
        self.inner
            .metrics
            .record_run(summary.state.as_str(), elapsed);
        self.inner.registry.upsert(summary.clone());
        {
            let mut active = self.active_lock();
            if active.as_ref().map(|(id, _)| *id) == Some(run.run_id) {
                *active = None;
            }
        }
        // Release the gate before announcing, so listeners may start a new run.
        drop(lease);

        info!(
            run_id = %summary.run_id,
            state = %summary.state,
            scraped = summary.counters.scraped,
            validated = summary.counters.validated,
            stored = summary.counters.stored,
            failed = summary.counters.failed,
            warnings = summary.warnings.len(),
            elapsed_secs = format!("{:.2}", elapsed),
            "Run finished"
        );
        let _ = self.inner.events.send(summary.clone());
        summary
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        config: &PipelineConfig,
        cancel: &CancelSignal,
    ) -> Result<(), PipelineError> {
        let components = &self.inner.components;

        // INIT
        let dispatcher = SinkDispatcher::new(
            Arc::clone(&components.primary_sink),
            components.secondary_sinks.clone(),
            config.sink_policy,
            config.retry.clone(),
            config.timeouts.sink,
        );
        let index = Arc::new(LeadIndex::new());
        match dispatcher.load_identifiers().await {
            Ok(identifiers) => {
                debug!(run_id = %run.run_id, count = identifiers.len(), "Seeded lead index");
                index.seed(identifiers);
            }
            Err(e) => run.warn(format!(
                "could not load stored identifiers, duplicate detection limited to this run: {}",
                e
            )),
        }
        self.checkpoint(run, cancel)?;

        // SCRAPING
        let records = self.scrape(run, config, cancel).await?;
        self.checkpoint(run, cancel)?;

        // VALIDATING
        let accepted = self
            .validate(run, config, &index, &dispatcher, records, cancel)
            .await?;
        self.checkpoint(run, cancel)?;

        // ANALYZING
        let leads = self.analyze(run, config, accepted, cancel).await?;
        self.checkpoint(run, cancel)?;

        // STORING
        let stored = self
            .store(run, config, &index, &dispatcher, leads, cancel)
            .await?;
        self.checkpoint(run, cancel)?;

        // REPORTING
        let report = RunReport::build(&run.summary(), &stored);
        if let Err(e) = report.write(&config.reports_dir()).await {
            run.warn(format!("could not write run report: {}", e));
        }
        if config.export_csv {
            if let Err(e) = export::write_leads_csv(&config.exports_dir(), run.run_id, &stored).await {
                run.warn(format!("could not write lead CSV: {}", e));
            }
        }
        self.checkpoint(run, cancel)?;

        Ok(())
    }

    /// Fails a cancelled run, otherwise advances it to the next state.
    fn checkpoint(&self, run: &mut PipelineRun, cancel: &CancelSignal) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(run.state()));
        }
        run.advance();
        self.inner.registry.upsert(run.summary());
        Ok(())
    }

    async fn scrape(
        &self,
        run: &mut PipelineRun,
        config: &PipelineConfig,
        cancel: &CancelSignal,
    ) -> Result<Vec<RawRecord>, PipelineError> {
        let pool_config = WorkerPoolConfig::new(config.max_parallel_workers)
            .with_retry(config.retry.clone())
            .with_attempt_timeout(config.timeouts.acquisition)
            .with_cancel_grace(config.cancel_grace);
        let mut pool = WorkerPool::new(
            pool_config,
            Arc::clone(&self.inner.router),
            self.inner.components.venues.clone(),
            cancel.clone(),
        );
        let mut results = pool.results()?;
        pool.start()?;

        for source in &config.sources {
            if let Err(e) = pool.submit(Task::from_source(source)) {
                pool.cancel();
                return Err(e.into());
            }
        }
        pool.close();

        let mut records = Vec::new();
        while let Some(outcome) = results.next().await {
            match outcome.result {
                Ok(record) => {
                    RunCounters::incr(&run.counters.scraped);
                    records.push(record);
                }
                Err(e) => {
                    RunCounters::incr(&run.counters.failed);
                    debug!(
                        run_id = %run.run_id,
                        task_id = %outcome.task.id,
                        source_id = %outcome.task.source_id,
                        attempts = outcome.task.attempts,
                        error = %e,
                        "Task failed"
                    );
                }
            }
        }

        if let Err(e) = pool.shutdown().await {
            run.warn(format!("worker pool shutdown: {}", e));
        }

        let stats = pool.stats();
        info!(
            run_id = %run.run_id,
            scraped = records.len(),
            failed = stats.tasks_failed,
            retries = stats.retries,
            success_rate = format!("{:.2}", stats.success_rate()),
            peak_active_attempts = stats.peak_active_attempts,
            "Scraping finished"
        );
        Ok(records)
    }

    async fn validate(
        &self,
        run: &mut PipelineRun,
        config: &PipelineConfig,
        index: &Arc<LeadIndex>,
        dispatcher: &SinkDispatcher,
        records: Vec<RawRecord>,
        cancel: &CancelSignal,
    ) -> Result<Vec<LeadRecord>, PipelineError> {
        let Some(min_confidence) = config.min_confidence else {
            return Err(ConfigError::ValidationFailed("min_confidence must be set".to_string()).into());
        };
        let engine = ValidationEngine::new(
            self.inner.schema.clone(),
            CrossReferenceCheck::new(
                Arc::clone(index),
                &config.known_categories,
                config.fuzzy_threshold,
            ),
            ExternalCheck::new(
                Arc::clone(&self.inner.components.verifier),
                config.retry.clone(),
                config.timeouts.verification,
            ),
            config.weights,
            min_confidence,
        );

        let engine = &engine;
        let retry = &config.retry;
        let max_passes = config.max_validation_passes;
        let pending = stream::iter(records)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|record| async move {
                let verdict = validate_with_repasses(engine, &record, retry, max_passes).await;
                (record, verdict)
            })
            .buffer_unordered(config.max_parallel_validation)
            .collect::<Vec<(RawRecord, ValidationVerdict)>>();
        let verdicts = match cancel.with_grace(config.cancel_grace, pending).await {
            Some(verdicts) if !cancel.is_cancelled() => verdicts,
            _ => return Err(PipelineError::Cancelled(run.state())),
        };

        let mut accepted = Vec::new();
        let mut quarantine_failures = 0usize;
        let mut unstored_quarantine = 0usize;
        for (record, verdict) in verdicts {
            match verdict.decision {
                Decision::Accepted => match LeadRecord::from_accepted(&record, &verdict) {
                    Ok(lead) => {
                        RunCounters::incr(&run.counters.validated);
                        accepted.push(lead);
                    }
                    Err(e) => {
                        RunCounters::incr(&run.counters.rejected);
                        warn!(run_id = %run.run_id, record_id = %record.id, error = %e, "Accepted record has no usable identifier");
                    }
                },
                Decision::Rejected => {
                    RunCounters::incr(&run.counters.rejected);
                }
                Decision::Quarantined => {
                    RunCounters::incr(&run.counters.quarantined);
                    let entry = QuarantineEntry::new(run.run_id, record, verdict);
                    match dispatcher.quarantine(&entry).await {
                        Ok(true) => {}
                        Ok(false) => unstored_quarantine += 1,
                        Err(e) => {
                            quarantine_failures += 1;
                            warn!(
                                run_id = %run.run_id,
                                record_id = %entry.record.id,
                                error = %e,
                                "Could not store quarantined record"
                            );
                        }
                    }
                }
            }
        }

        if quarantine_failures > 0 {
            run.warn(format!(
                "{} quarantined records could not be stored",
                quarantine_failures
            ));
        }
        if unstored_quarantine > 0 {
            run.warn(format!(
                "primary sink has no quarantine store, {} quarantined records kept in the run summary only",
                unstored_quarantine
            ));
        }

        let snap = run.counters.snapshot();
        info!(
            run_id = %run.run_id,
            accepted = snap.validated,
            rejected = snap.rejected,
            quarantined = snap.quarantined,
            "Validation finished"
        );
        Ok(accepted)
    }

    async fn analyze(
        &self,
        run: &mut PipelineRun,
        config: &PipelineConfig,
        leads: Vec<LeadRecord>,
        cancel: &CancelSignal,
    ) -> Result<Vec<LeadRecord>, PipelineError> {
        let stage = AnalysisStage::new(
            Arc::clone(&self.inner.components.analyzer),
            config.retry.clone(),
            config.timeouts.analysis,
            config.max_parallel_analysis,
        )
        .with_cancel(cancel.clone());
        let total = leads.len();
        let outcome = match cancel.with_grace(config.cancel_grace, stage.run(leads)).await {
            Some(result) if !cancel.is_cancelled() => result?,
            _ => return Err(PipelineError::Cancelled(run.state())),
        };

        run.counters
            .analyzed
            .fetch_add(outcome.analyzed, std::sync::atomic::Ordering::Relaxed);
        if !outcome.failures.is_empty() {
            run.warn(format!(
                "{} of {} leads will be stored without analysis",
                outcome.failures.len(),
                total
            ));
        }
        Ok(outcome.leads)
    }

    async fn store(
        &self,
        run: &mut PipelineRun,
        config: &PipelineConfig,
        index: &LeadIndex,
        dispatcher: &SinkDispatcher,
        leads: Vec<LeadRecord>,
        cancel: &CancelSignal,
    ) -> Result<Vec<LeadRecord>, PipelineError> {
        let mut stored = Vec::new();
        let mut degraded: BTreeMap<String, (usize, String)> = BTreeMap::new();
        let mut interrupted = false;

        for mut lead in leads {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            if !index.try_reserve(&lead.identifier) {
                RunCounters::incr(&run.counters.duplicates);
                debug!(run_id = %run.run_id, lead_id = %lead.id, "Skipping duplicate lead");
                continue;
            }

            let Some(result) = cancel
                .with_grace(config.cancel_grace, dispatcher.persist(&lead))
                .await
            else {
                index.release(&lead.identifier);
                warn!(run_id = %run.run_id, lead_id = %lead.id, "Write abandoned after grace period");
                interrupted = true;
                break;
            };
            match result {
                Ok(ack) => {
                    index.commit(&lead.identifier, lead.id);
                    for (sink, error) in ack.degraded {
                        let entry = degraded.entry(sink).or_insert((0, String::new()));
                        entry.0 += 1;
                        entry.1 = error;
                    }
                    match ack.status {
                        WriteStatus::Stored => {
                            lead.status = LeadStatus::Stored;
                            RunCounters::incr(&run.counters.stored);
                            stored.push(lead);
                        }
                        WriteStatus::AlreadyPresent => {
                            lead.status = LeadStatus::Duplicate;
                            RunCounters::incr(&run.counters.duplicates);
                        }
                    }
                }
                Err(e) => {
                    index.release(&lead.identifier);
                    if e.is_run_fatal() {
                        self.inner.metrics.record_leads_stored(stored.len());
                        return Err(e.into());
                    }
                    run.warn(format!("lead {} not stored: {}", lead.id, e));
                }
            }
        }

        for (sink, (count, last_error)) in degraded {
            run.warn(format!(
                "sink {} degraded: {} writes failed, last error: {}",
                sink, count, last_error
            ));
        }
        self.inner.metrics.record_leads_stored(stored.len());
        if interrupted || cancel.is_cancelled() {
            info!(run_id = %run.run_id, stored = stored.len(), "Storing interrupted by cancellation");
            return Err(PipelineError::Cancelled(run.state()));
        }
        info!(run_id = %run.run_id, stored = stored.len(), "Storing finished");
        Ok(stored)
    }
}

/// Validates a record, re-running validation with backoff while it stays
/// quarantined only because verification was unreachable.
async fn validate_with_repasses(
    engine: &ValidationEngine,
    record: &RawRecord,
    retry: &RetryPolicy,
    max_passes: u32,
) -> ValidationVerdict {
    let mut verdict = engine.validate(record).await;
    while verdict.decision == Decision::Quarantined && verdict.retryable && verdict.pass < max_passes
    {
        tokio::time::sleep(retry.delay_for(verdict.pass)).await;
        debug!(record_id = %record.id, pass = verdict.pass + 1, "Re-validating quarantined record");
        verdict = engine.validate_pass(record, verdict.pass + 1).await;
    }
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{Acquirer, VenueSet};
    use crate::error::AcquisitionError;
    use crate::records::Payload;
    use crate::scheduler::SourceSpec;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct ListingAcquirer;

    #[async_trait]
    impl Acquirer for ListingAcquirer {
        fn name(&self) -> &str {
            "listing"
        }

        async fn acquire(&self, task: &Task) -> Result<Payload, AcquisitionError> {
            let Value::Object(map) = json!({
                "address": format!("{} Harbor Road", task.locator),
                "category": "foreclosure",
                "list_price": 250000.0,
                "estimated_value": 320000.0,
            }) else {
                unreachable!()
            };
            Ok(map)
        }
    }

    fn orchestrator(dir: &tempfile::TempDir) -> (PipelineOrchestrator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new("memory"));
        let acquirer: Arc<dyn Acquirer> = Arc::new(ListingAcquirer);
        let components = PipelineComponents::in_memory()
            .with_venues(VenueSet::new(Arc::clone(&acquirer), acquirer))
            .with_primary_sink(sink.clone());
        let orchestrator =
            PipelineOrchestrator::with_components(config(dir, 3), components).unwrap();
        (orchestrator, sink)
    }

    fn config(dir: &tempfile::TempDir, sources: usize) -> PipelineConfig {
        PipelineConfig::default()
            .with_min_confidence(0.5)
            .with_results_path(dir.path())
            .with_retry(RetryPolicy::new(1, Duration::from_millis(1)).with_jitter(false))
            .with_sources(
                (0..sources)
                    .map(|i| SourceSpec::new(format!("src-{}", i), format!("{}", i + 1)))
                    .collect(),
            )
    }

    #[tokio::test]
    async fn test_no_sources_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(&dir);
        let err = orchestrator
            .start_run(config(&dir, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoSources));
        assert!(orchestrator.runs().is_empty());
    }

    #[tokio::test]
    async fn test_run_completes_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, sink) = orchestrator(&dir);
        let mut events = orchestrator.subscribe();

        let summary = orchestrator.start_run(config(&dir, 3)).await.unwrap();
        assert_eq!(summary.state, RunState::Complete, "{:?}", summary.error);
        assert_eq!(summary.counters.scraped, 3);
        assert_eq!(summary.counters.validated, 3);
        assert_eq!(summary.counters.analyzed, 3);
        assert_eq!(summary.counters.stored, 3);
        assert_eq!(sink.len(), 3);

        let report = dir
            .path()
            .join("reports")
            .join(format!("report_{}.json", summary.run_id));
        assert!(report.exists());

        let event = events.recv().await.unwrap();
        assert_eq!(event.run_id, summary.run_id);
        assert_eq!(orchestrator.run(summary.run_id).unwrap().state, RunState::Complete);
        assert!(orchestrator.active_run().is_none());
    }

    #[tokio::test]
    async fn test_second_run_sees_stored_leads() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, sink) = orchestrator(&dir);

        orchestrator.start_run(config(&dir, 2)).await.unwrap();
        let second = orchestrator.start_run(config(&dir, 2)).await.unwrap();

        assert_eq!(second.state, RunState::Complete);
        assert_eq!(second.counters.stored, 0);
        assert_eq!(second.counters.quarantined, 2);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(&dir);
        assert!(!orchestrator.cancel(Uuid::new_v4()));
    }
}
