//! Pipeline orchestration for lead acquisition runs.
//!
//! This module drives a run from configured sources to stored, analysed leads
//! and a run report.
//!
//! # Architecture
//!
//! - **Orchestrator**: Drives a run through its stages and enforces that only
//!   one run is live at a time
//! - **RunGate**: Lease (owner run id + expiry) renewed by a heartbeat
//! - **Components**: The acquisition, verification, analysis and sink
//!   capabilities a run uses
//! - **AutoHealSupervisor**: Starts a fresh run after a failed one
//! - **Config**: Configuration for all pipeline components
//!
//! # Run Flow
//!
//! 1. **INIT**: Acquire the run gate, seed duplicate detection from the
//!    primary sink
//! 2. **SCRAPING**: One task per source through the worker pool
//! 3. **VALIDATING**: Schema, cross-reference and external checks; records
//!    quarantined by an unreachable verifier get further passes
//! 4. **ANALYZING**: Score accepted leads
//! 5. **STORING**: Deduplicate and persist through the sink dispatcher
//! 6. **REPORTING**: Write `report_<run_id>.json` and the lead CSV export
//! 7. **COMPLETE** or **FAILED**
//!
//! # Example
//!
//! ```rust,ignore
//! use lead_sniper::pipeline::{PipelineConfig, PipelineOrchestrator};
//! use lead_sniper::scheduler::SourceSpec;
//!
//! let config = PipelineConfig::from_env()?
//!     .with_sources(vec![SourceSpec::new("county", "https://records.example/foreclosures")]);
//! let orchestrator = PipelineOrchestrator::new(config.clone()).await?;
//!
//! let summary = orchestrator.start_run(config).await?;
//! println!("{}: {} leads stored", summary.state, summary.counters.stored);
//! ```

pub mod components;
pub mod config;
pub mod export;
pub mod gate;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod run;
pub mod state;
pub mod supervisor;

// Re-export main types for convenience
pub use components::PipelineComponents;
pub use config::{ConfigError, Endpoints, PipelineConfig, SinkConfig, SinkKind, Timeouts};
pub use gate::{LeaseGuard, RunGate};
pub use orchestrator::{PipelineError, PipelineOrchestrator};
pub use progress::{CounterSnapshot, ProgressMonitor, RunCounters};
pub use report::RunReport;
pub use run::{PipelineRun, RunHandle, RunRegistry, RunSummary};
pub use state::RunState;
pub use supervisor::{AutoHealConfig, AutoHealSupervisor};
