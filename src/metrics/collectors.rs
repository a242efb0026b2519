//! High-level metric recording.
//!
//! `MetricsCollector` wraps the raw Prometheus statics with one method per
//! pipeline event. Every method is a no-op until `init_metrics()` has run, so
//! library code can record unconditionally.

use super::prometheus::{
    ACTIVE_WORKERS, ANALYSES_TOTAL, CIRCUIT_STATE, CONFIDENCE, LEADS_STORED_TOTAL, QUEUE_DEPTH,
    ROUTES_TOTAL, RUNS_TOTAL, RUN_DURATION, SINK_WRITES_TOTAL, TASKS_TOTAL, VERDICTS_TOTAL,
};
use crate::routing::CircuitState;

/// Metrics collector for recording pipeline operational metrics.
///
/// # Example
///
/// ```ignore
/// use lead_sniper::metrics::{MetricsCollector, init_metrics};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_task("succeeded");
/// collector.record_verdict("accepted", 0.92);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a scrape task reaching a terminal status
    /// (`succeeded`, `failed` or `cancelled`).
    pub fn record_task(&self, status: &str) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[status]).inc();
        }
        tracing::trace!(status = status, "Recorded task metric");
    }

    pub fn record_route(&self, venue: &str, reason: &str) {
        if let Some(routes_total) = ROUTES_TOTAL.get() {
            routes_total.with_label_values(&[venue, reason]).inc();
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.set(depth as f64);
        }
    }

    /// Mark an attempt as in flight.
    pub fn worker_started(&self) {
        if let Some(active) = ACTIVE_WORKERS.get() {
            active.inc();
        }
    }

    pub fn worker_finished(&self) {
        if let Some(active) = ACTIVE_WORKERS.get() {
            active.dec();
        }
    }

    /// Record a venue circuit transition.
    pub fn record_circuit_state(&self, venue: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        if let Some(circuit_state) = CIRCUIT_STATE.get() {
            circuit_state.with_label_values(&[venue]).set(value);
        }
        tracing::trace!(venue = venue, state = %state, "Recorded circuit state");
    }

    /// Record a validation verdict and its confidence.
    pub fn record_verdict(&self, decision: &str, confidence: f64) {
        if let Some(verdicts_total) = VERDICTS_TOTAL.get() {
            verdicts_total.with_label_values(&[decision]).inc();
        }
        if let Some(histogram) = CONFIDENCE.get() {
            histogram.observe(confidence.clamp(0.0, 1.0));
        }
        tracing::trace!(
            decision = decision,
            confidence = confidence,
            "Recorded verdict metric"
        );
    }

    pub fn record_analysis(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        if let Some(analyses_total) = ANALYSES_TOTAL.get() {
            analyses_total.with_label_values(&[status]).inc();
        }
    }

    /// Record one sink write (`stored`, `duplicate`, `failed` or `timeout`).
    pub fn record_sink_write(&self, sink: &str, status: &str) {
        if let Some(sink_writes) = SINK_WRITES_TOTAL.get() {
            sink_writes.with_label_values(&[sink, status]).inc();
        }
    }

    pub fn record_leads_stored(&self, count: usize) {
        if let Some(stored) = LEADS_STORED_TOTAL.get() {
            stored.inc_by(count as f64);
        }
    }

    /// Record a run reaching a terminal state.
    pub fn record_run(&self, state: &str, duration_secs: f64) {
        if let Some(runs_total) = RUNS_TOTAL.get() {
            runs_total.with_label_values(&[state]).inc();
        }
        if let Some(run_duration) = RUN_DURATION.get() {
            run_duration.observe(duration_secs);
        }
        tracing::trace!(
            state = state,
            duration_secs = duration_secs,
            "Recorded run metric"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_pipeline_events() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_task("succeeded");
        collector.record_route("local", "primary");
        collector.set_queue_depth(12);
        collector.worker_started();
        collector.worker_finished();
        collector.record_circuit_state("cloud", CircuitState::Open);
        collector.record_verdict("accepted", 0.91);
        collector.record_verdict("quarantined", 1.7);
        collector.record_analysis(true);
        collector.record_sink_write("jsonl", "stored");
        collector.record_leads_stored(3);
        collector.record_run("complete", 42.0);

        let text = export_metrics();
        if TASKS_TOTAL.get().is_some() {
            assert!(text.contains("lead_sniper_verdicts_total"));
            assert!(text.contains("lead_sniper_circuit_state"));
        }
    }
}
