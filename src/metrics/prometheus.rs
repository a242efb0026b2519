//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by lead-sniper and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all lead-sniper metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Scrape tasks finished, labeled by terminal status.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Routing decisions, labeled by venue and reason.
pub static ROUTES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Tasks waiting in the work queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Scrape attempts currently in flight.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Circuit state per venue: 0 closed, 1 half-open, 2 open.
pub static CIRCUIT_STATE: OnceLock<GaugeVec> = OnceLock::new();

/// Validation verdicts, labeled by decision.
pub static VERDICTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of aggregate validation confidence.
pub static CONFIDENCE: OnceLock<Histogram> = OnceLock::new();

/// Analyses performed, labeled by status.
pub static ANALYSES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Sink writes, labeled by sink and status.
pub static SINK_WRITES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Leads newly persisted.
pub static LEADS_STORED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Finished runs, labeled by terminal state.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of runs in seconds.
pub static RUN_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Repeated calls leave the first registration in
/// place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Acquisition metrics
    let tasks_total = CounterVec::new(
        Opts::new("lead_sniper_tasks_total", "Scrape tasks finished"),
        &["status"],
    )?;

    let routes_total = CounterVec::new(
        Opts::new("lead_sniper_routes_total", "Routing decisions"),
        &["venue", "reason"],
    )?;

    let queue_depth = Gauge::new("lead_sniper_queue_depth", "Tasks waiting in the queue")?;

    let active_workers = Gauge::new(
        "lead_sniper_active_workers",
        "Scrape attempts currently in flight",
    )?;

    let circuit_state = GaugeVec::new(
        Opts::new(
            "lead_sniper_circuit_state",
            "Venue circuit state (0 closed, 1 half-open, 2 open)",
        ),
        &["venue"],
    )?;

    // Validation metrics
    let verdicts_total = CounterVec::new(
        Opts::new("lead_sniper_verdicts_total", "Validation verdicts"),
        &["decision"],
    )?;

    let confidence = Histogram::with_opts(
        HistogramOpts::new(
            "lead_sniper_confidence",
            "Distribution of validation confidence",
        )
        .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
    )?;

    // Analysis and storage metrics
    let analyses_total = CounterVec::new(
        Opts::new("lead_sniper_analyses_total", "Analyses performed"),
        &["status"],
    )?;

    let sink_writes_total = CounterVec::new(
        Opts::new("lead_sniper_sink_writes_total", "Sink writes"),
        &["sink", "status"],
    )?;

    let leads_stored_total =
        Counter::new("lead_sniper_leads_stored_total", "Leads newly persisted")?;

    // Run metrics
    let runs_total = CounterVec::new(
        Opts::new("lead_sniper_runs_total", "Finished pipeline runs"),
        &["state"],
    )?;

    let run_duration = Histogram::with_opts(
        HistogramOpts::new("lead_sniper_run_duration_seconds", "Pipeline run duration")
            .buckets(vec![10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(routes_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(circuit_state.clone()))?;
    registry.register(Box::new(verdicts_total.clone()))?;
    registry.register(Box::new(confidence.clone()))?;
    registry.register(Box::new(analyses_total.clone()))?;
    registry.register(Box::new(sink_writes_total.clone()))?;
    registry.register(Box::new(leads_stored_total.clone()))?;
    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;

    // Already-initialized statics keep their first value
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = ROUTES_TOTAL.set(routes_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = CIRCUIT_STATE.set(circuit_state);
    let _ = VERDICTS_TOTAL.set(verdicts_total);
    let _ = CONFIDENCE.set(confidence);
    let _ = ANALYSES_TOTAL.set(analyses_total);
    let _ = SINK_WRITES_TOTAL.set(sink_writes_total);
    let _ = LEADS_STORED_TOTAL.set(leads_stored_total);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = RUN_DURATION.set(run_duration);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        // First call should succeed or metrics already initialized
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(tasks) = TASKS_TOTAL.get() {
            tasks.with_label_values(&["succeeded"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        if REGISTRY.get().is_some() {
            assert!(metrics.contains("lead_sniper_tasks_total"));
        }
    }
}
