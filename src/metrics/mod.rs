//! Metrics module for Prometheus-based monitoring.
//!
//! Covers task dispatch, venue routing and circuit state, validation
//! verdicts, sink writes and run outcomes.
//!
//! # Example
//!
//! ```ignore
//! use lead_sniper::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_run("complete", 120.5);
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    ACTIVE_WORKERS, ANALYSES_TOTAL, CIRCUIT_STATE, CONFIDENCE, LEADS_STORED_TOTAL, QUEUE_DEPTH,
    REGISTRY, ROUTES_TOTAL, RUNS_TOTAL, RUN_DURATION, SINK_WRITES_TOTAL, TASKS_TOTAL,
    VERDICTS_TOTAL,
};
