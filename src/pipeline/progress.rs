//! Run counters and the background progress monitor.
//!
//! Stages increment the shared counters as records move through a run; the
//! monitor logs them periodically so long runs can be followed without
//! reading per-record log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Raw records acquired.
    pub scraped: usize,
    /// Records accepted by validation.
    pub validated: usize,
    /// Leads enriched by analysis.
    pub analyzed: usize,
    /// Leads newly written.
    pub stored: usize,
    /// Tasks that ended without a record.
    pub failed: usize,
    pub rejected: usize,
    pub quarantined: usize,
    /// Leads skipped because they were already stored.
    pub duplicates: usize,
}

/// Shared atomic counters for one run.
///
/// Cloned into stage futures and incremented via `fetch_add`.
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    pub scraped: Arc<AtomicUsize>,
    pub validated: Arc<AtomicUsize>,
    pub analyzed: Arc<AtomicUsize>,
    pub stored: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    pub rejected: Arc<AtomicUsize>,
    pub quarantined: Arc<AtomicUsize>,
    pub duplicates: Arc<AtomicUsize>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            scraped: self.scraped.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            analyzed: self.analyzed.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// A background task that periodically logs run progress.
///
/// Call [`ProgressMonitor::stop`] to cancel; dropping the monitor also stops
/// it at the next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a background progress monitor that logs every `interval`.
    ///
    /// # Arguments
    ///
    /// * `run_id` - Run the counters belong to
    /// * `counters` - Shared counters incremented by the stages
    /// * `expected_tasks` - Number of submitted tasks (used for progress percentage)
    /// * `interval` - How often to emit progress logs
    pub fn start(
        run_id: Uuid,
        counters: RunCounters,
        expected_tasks: usize,
        interval: Duration,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval.max(Duration::from_millis(10)));
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot();
                let finished = snap.scraped + snap.failed;
                let pct = if expected_tasks > 0 {
                    (finished as f64 / expected_tasks as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };
                let elapsed_secs = start.elapsed().as_secs_f64();
                let scraped_per_sec = if elapsed_secs > 0.0 {
                    snap.scraped as f64 / elapsed_secs
                } else {
                    0.0
                };

                tracing::info!(
                    run_id = %run_id,
                    scraped = snap.scraped,
                    failed = snap.failed,
                    validated = snap.validated,
                    rejected = snap.rejected,
                    quarantined = snap.quarantined,
                    analyzed = snap.analyzed,
                    stored = snap.stored,
                    duplicates = snap.duplicates,
                    expected_tasks,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = start.elapsed().as_secs(),
                    scraped_per_sec = format!("{:.2}", scraped_per_sec),
                    "Run progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the background monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_default() {
        let snap = RunCounters::new().snapshot();
        assert_eq!(snap, CounterSnapshot::default());
    }

    #[test]
    fn test_counters_shared_between_clones() {
        let counters = RunCounters::new();
        let clone = counters.clone();
        RunCounters::incr(&clone.scraped);
        RunCounters::incr(&clone.scraped);
        clone.stored.fetch_add(5, Ordering::Relaxed);

        let snap = counters.snapshot();
        assert_eq!(snap.scraped, 2);
        assert_eq!(snap.stored, 5);
        assert_eq!(snap.failed, 0);
    }

    #[tokio::test]
    async fn test_monitor_start_stop() {
        let counters = RunCounters::new();
        let monitor =
            ProgressMonitor::start(Uuid::new_v4(), counters.clone(), 10, Duration::from_millis(10));
        RunCounters::incr(&counters.scraped);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(1), monitor.stop())
            .await
            .expect("monitor should stop promptly");
    }
}
