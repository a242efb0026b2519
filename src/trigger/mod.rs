//! Ways to start a run from outside the process.
//!
//! - **HTTP**: `POST /run` answers 202 with the run id, or 409 when a run is
//!   already live; it never waits for the run
//! - **Schedule**: in-process cron tick (default 05:00 daily)
//!
//! Both go through [`PipelineOrchestrator::trigger`](crate::pipeline::PipelineOrchestrator::trigger),
//! so the single-run gate applies to each.

pub mod http;
pub mod schedule;

pub use http::{router, serve, RunRequest, TriggerState};
pub use schedule::{CronTrigger, ScheduleError};
