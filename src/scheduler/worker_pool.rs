//! Worker pool for acquisition tasks.
//!
//! A fixed set of workers pulls tasks from the shared [`TaskQueue`], asks the
//! [`SmartRouter`] for a venue, and runs one attempt at a time. Outcomes are
//! emitted on a stream as each task reaches a terminal state.
//!
//! # Features
//!
//! - Exactly `max_parallel_workers` concurrent attempts at most
//! - Each attempt runs in its own spawned task with a deadline, so a panic or
//!   hang is contained to that attempt
//! - Transient failures are requeued after exponential backoff; a task is
//!   never in the queue and executing at the same time
//! - Cancellation stops dispatch, gives in-flight attempts a grace period,
//!   then aborts them; everything unfinished is emitted as cancelled

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use super::backoff::RetryPolicy;
use super::cancel::CancelSignal;
use super::queue::{QueueError, TaskQueue};
use super::task::Task;
use crate::acquisition::VenueSet;
use crate::error::AcquisitionError;
use crate::metrics::MetricsCollector;
use crate::records::RawRecord;
use crate::routing::{SmartRouter, Venue, VenueOutcome};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// The results stream was already handed out.
    #[error("Results stream already taken")]
    ResultsTaken,

    /// Task submission was refused.
    #[error("Task rejected by queue: {0}")]
    Queue(#[from] QueueError),

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of workers, and therefore the concurrency ceiling.
    pub max_parallel_workers: usize,
    /// Retry budget and backoff for transient failures.
    pub retry: RetryPolicy,
    /// Deadline for a single acquisition attempt.
    pub attempt_timeout: Duration,
    /// How long in-flight attempts may keep running after cancellation.
    pub cancel_grace: Duration,
    /// Timeout for waiting on workers in [`WorkerPool::shutdown`].
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_parallel_workers: 100,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(max_parallel_workers: usize) -> Self {
        Self {
            max_parallel_workers,
            ..Default::default()
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt deadline.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Sets the cancellation grace period.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Terminal result of one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: Task,
    pub result: Result<RawRecord, AcquisitionError>,
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Attempts currently executing.
    pub active_attempts: usize,
    /// Highest number of concurrent attempts observed.
    pub peak_active_attempts: usize,
    /// Tasks that produced a record.
    pub tasks_succeeded: u64,
    /// Tasks that ended in failure, including cancellations.
    pub tasks_failed: u64,
    /// Attempts that were scheduled for retry.
    pub retries: u64,
    /// Average attempt duration.
    pub average_attempt_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of tasks processed (succeeded + failed).
    pub fn total_processed(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_succeeded as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
#[derive(Default)]
struct SharedPoolStats {
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    retries: AtomicU64,
    attempts: AtomicU64,
    total_attempt_ms: AtomicU64,
    active: AtomicU64,
    peak_active: AtomicU64,
}

impl SharedPoolStats {
    fn begin_attempt(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn end_attempt(&self, duration: Duration) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.total_attempt_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let attempts = self.attempts.load(Ordering::SeqCst);
        let total_ms = self.total_attempt_ms.load(Ordering::SeqCst);
        PoolStats {
            num_workers,
            active_attempts: self.active.load(Ordering::SeqCst) as usize,
            peak_active_attempts: self.peak_active.load(Ordering::SeqCst) as usize,
            tasks_succeeded: self.tasks_succeeded.load(Ordering::SeqCst),
            tasks_failed: self.tasks_failed.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            average_attempt_duration: if attempts > 0 {
                Duration::from_millis(total_ms / attempts)
            } else {
                Duration::ZERO
            },
        }
    }
}

/// State shared by every worker and retry timer of one pool.
struct PoolShared {
    config: WorkerPoolConfig,
    queue: Arc<TaskQueue>,
    router: Arc<SmartRouter>,
    venues: VenueSet,
    cancel: CancelSignal,
    stats: SharedPoolStats,
    metrics: MetricsCollector,
}

impl PoolShared {
    fn emit(&self, tx: &mpsc::UnboundedSender<TaskOutcome>, outcome: TaskOutcome) {
        match &outcome.result {
            Ok(_) => {
                self.stats.tasks_succeeded.fetch_add(1, Ordering::SeqCst);
                self.metrics.record_task("succeeded");
            }
            Err(AcquisitionError::Cancelled(_)) => {
                self.stats.tasks_failed.fetch_add(1, Ordering::SeqCst);
                self.metrics.record_task("cancelled");
            }
            Err(_) => {
                self.stats.tasks_failed.fetch_add(1, Ordering::SeqCst);
                self.metrics.record_task("failed");
            }
        }
        self.queue.finish();
        self.metrics.set_queue_depth(self.queue.len());
        if tx.send(outcome).is_err() {
            debug!("Outcome receiver dropped, discarding task outcome");
        }
    }

    fn emit_cancelled(&self, tx: &mpsc::UnboundedSender<TaskOutcome>, mut task: Task, reason: &str) {
        let error = AcquisitionError::Cancelled(reason.to_string());
        task.mark_failed(&error);
        self.emit(
            tx,
            TaskOutcome {
                task,
                result: Err(error),
            },
        );
    }
}

/// Pool of workers that execute acquisition tasks.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    results_tx: Option<mpsc::UnboundedSender<TaskOutcome>>,
    results_rx: Option<mpsc::UnboundedReceiver<TaskOutcome>>,
    worker_handles: Vec<JoinHandle<()>>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool configuration
    /// * `router` - Venue router shared across runs
    /// * `venues` - Acquirer for each venue
    /// * `cancel` - Run-level cancellation signal
    pub fn new(
        config: WorkerPoolConfig,
        router: Arc<SmartRouter>,
        venues: VenueSet,
        cancel: CancelSignal,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(PoolShared {
                config,
                queue: Arc::new(TaskQueue::new()),
                router,
                venues,
                cancel,
                stats: SharedPoolStats::default(),
                metrics: MetricsCollector::new(),
            }),
            results_tx: Some(results_tx),
            results_rx: Some(results_rx),
            worker_handles: Vec::new(),
            is_running: AtomicBool::new(false),
        }
    }

    /// Spawns the workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if called twice.
    pub fn start(&mut self) -> Result<(), PoolError> {
        let Some(results_tx) = self.results_tx.take() else {
            return Err(PoolError::AlreadyRunning);
        };

        let num_workers = self.shared.config.max_parallel_workers.max(1);
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                shared: Arc::clone(&self.shared),
                results_tx: results_tx.clone(),
            };
            self.worker_handles.push(tokio::spawn(worker.run()));
        }
        // Workers and retry timers now hold the only senders, so the results
        // stream ends once every task is terminal and the workers exit.
        drop(results_tx);

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers, "Worker pool started");
        Ok(())
    }

    /// Submits a task for execution.
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        debug!(task_id = %task.id, source_id = %task.source_id, "Task submitted");
        self.shared.queue.push(task)?;
        self.shared.metrics.set_queue_depth(self.shared.queue.len());
        Ok(())
    }

    /// Signals that no more tasks will be submitted. Workers exit once every
    /// submitted task is terminal.
    pub fn close(&self) {
        self.shared.queue.close();
    }

    /// Stream of terminal task outcomes. Can be taken once.
    pub fn results(&mut self) -> Result<UnboundedReceiverStream<TaskOutcome>, PoolError> {
        self.results_rx
            .take()
            .map(UnboundedReceiverStream::new)
            .ok_or(PoolError::ResultsTaken)
    }

    /// Cancels the pool: stops dispatch, drains the queue, and gives
    /// in-flight attempts the configured grace period.
    pub fn cancel(&self) {
        info!("Cancelling worker pool");
        self.shared.cancel.cancel();
    }

    /// Waits for all workers to exit.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        let shutdown_timeout = self.shared.config.shutdown_timeout;
        let handles: Vec<_> = self.worker_handles.drain(..).collect();
        let join_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked");
                }
            }
        };

        let result = tokio::time::timeout(shutdown_timeout, join_all).await;
        self.is_running.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.shared
            .stats
            .to_pool_stats(self.shared.config.max_parallel_workers)
    }
}

/// A single worker that processes tasks from the queue.
struct Worker {
    id: String,
    shared: Arc<PoolShared>,
    results_tx: mpsc::UnboundedSender<TaskOutcome>,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            if self.shared.cancel.is_cancelled() {
                self.drain_on_cancel();
                break;
            }

            let next = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => {
                    self.drain_on_cancel();
                    break;
                }
                next = self.shared.queue.pop() => next,
            };

            match next {
                Some(task) => self.process_task(task).await,
                None => break,
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    fn drain_on_cancel(&self) {
        let drained = self.shared.queue.drain();
        if !drained.is_empty() {
            info!(worker_id = %self.id, count = drained.len(), "Cancelled queued tasks");
        }
        for task in drained {
            self.shared
                .emit_cancelled(&self.results_tx, task, "run cancelled before dispatch");
        }
    }

    async fn process_task(&self, mut task: Task) {
        let decision = self.shared.router.route(&task);
        let venue = decision.venue;
        task.begin_attempt(decision);

        debug!(
            worker_id = %self.id,
            task_id = %task.id,
            venue = %venue,
            attempt = task.attempts,
            "Starting attempt"
        );

        let start = Instant::now();
        self.shared.stats.begin_attempt();
        self.shared.metrics.worker_started();
        let result = self.execute_attempt(&task, venue).await;
        self.shared.metrics.worker_finished();
        self.shared.stats.end_attempt(start.elapsed());

        let feedback = match &result {
            Ok(_) => VenueOutcome::Success,
            Err(e) if e.is_venue_fault() => VenueOutcome::Failure,
            Err(_) => VenueOutcome::Neutral,
        };
        self.shared.router.record(venue, feedback);

        match result {
            Ok(record) => {
                task.mark_succeeded();
                debug!(worker_id = %self.id, task_id = %task.id, record_id = %record.id, "Task succeeded");
                self.shared.emit(
                    &self.results_tx,
                    TaskOutcome {
                        task,
                        result: Ok(record),
                    },
                );
            }
            Err(e) if e.is_retryable() => {
                let max_attempts = self.shared.config.retry.max_attempts();
                if self.shared.cancel.is_cancelled() {
                    self.shared
                        .emit_cancelled(&self.results_tx, task, "run cancelled during retry");
                } else if task.can_retry(max_attempts) {
                    self.schedule_retry(task, e);
                } else {
                    warn!(
                        worker_id = %self.id,
                        task_id = %task.id,
                        attempts = task.attempts,
                        error = %e,
                        "Task exhausted retries"
                    );
                    let error = AcquisitionError::Exhausted {
                        attempts: task.attempts,
                        last_error: e.to_string(),
                    };
                    task.mark_failed(&error);
                    self.shared.emit(
                        &self.results_tx,
                        TaskOutcome {
                            task,
                            result: Err(error),
                        },
                    );
                }
            }
            Err(e) => {
                warn!(worker_id = %self.id, task_id = %task.id, error = %e, "Task failed");
                task.mark_failed(&e);
                self.shared.emit(
                    &self.results_tx,
                    TaskOutcome {
                        task,
                        result: Err(e),
                    },
                );
            }
        }
    }

    /// Runs one attempt in its own task, honoring the attempt deadline and
    /// the cancellation grace period.
    async fn execute_attempt(
        &self,
        task: &Task,
        venue: Venue,
    ) -> Result<RawRecord, AcquisitionError> {
        let acquirer = self.shared.venues.get(venue);
        let attempt_timeout = self.shared.config.attempt_timeout;
        let attempt_task = task.clone();
        let mut handle = tokio::spawn(async move {
            tokio::time::timeout(attempt_timeout, acquirer.acquire(&attempt_task)).await
        });

        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = self.shared.cancel.cancelled() => {
                match tokio::time::timeout(self.shared.config.cancel_grace, &mut handle).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        handle.abort();
                        None
                    }
                }
            }
        };

        match joined {
            Some(Ok(Ok(Ok(payload)))) => Ok(RawRecord::from_task(task, venue, payload)),
            Some(Ok(Ok(Err(e)))) => Err(e),
            Some(Ok(Err(_elapsed))) => Err(AcquisitionError::Timeout(attempt_timeout)),
            Some(Err(join_error)) if join_error.is_panic() => {
                error!(worker_id = %self.id, task_id = %task.id, "Acquisition attempt panicked");
                Err(AcquisitionError::Transient(format!(
                    "attempt panicked: {}",
                    join_error
                )))
            }
            Some(Err(_)) => Err(AcquisitionError::Cancelled("attempt aborted".to_string())),
            None => Err(AcquisitionError::Cancelled(
                "attempt abandoned after grace period".to_string(),
            )),
        }
    }

    /// Requeues `task` after its backoff delay. Until then the task is in
    /// neither the queue nor a worker, so attempts of one task never overlap.
    fn schedule_retry(&self, mut task: Task, error: AcquisitionError) {
        let delay = self.shared.config.retry.delay_for(task.attempts);
        info!(
            worker_id = %self.id,
            task_id = %task.id,
            attempt = task.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying task after backoff"
        );
        task.mark_retrying(&error);
        self.shared.stats.retries.fetch_add(1, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => {
                    shared.emit_cancelled(&tx, task, "run cancelled during backoff");
                }
                _ = tokio::time::sleep(delay) => {
                    if let Err(QueueError::Drained(task)) = shared.queue.requeue(task) {
                        shared.emit_cancelled(&tx, *task, "run cancelled during backoff");
                    }
                }
            }
        });
    }
}
