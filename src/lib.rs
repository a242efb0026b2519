//! lead-sniper: autonomous lead acquisition pipeline.
//!
//! This library scrapes raw records from configured sources through a
//! bounded worker pool with local/cloud failover, gates them through a
//! three-stage validation engine, scores accepted leads and persists them to
//! one primary and any number of secondary sinks.

// Core modules
pub mod acquisition;
pub mod analysis;
pub mod cli;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod records;
pub mod routing;
pub mod scheduler;
pub mod sink;
pub mod trigger;
pub mod validation;

// Re-export commonly used error types
pub use error::{AcquisitionError, CapabilityError, SinkError};
pub use pipeline::{PipelineConfig, PipelineError, PipelineOrchestrator, RunState, RunSummary};
