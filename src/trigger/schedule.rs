//! Cron schedule trigger.
//!
//! Sleeps until the next tick of the expression and triggers a run. A tick
//! that finds a live run is logged and skipped; ticks missed while the process
//! was down or busy are not replayed.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::{PipelineConfig, PipelineError, PipelineOrchestrator};
use crate::scheduler::CancelSignal;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },
}

#[derive(Debug, Clone)]
pub struct CronTrigger {
    expr: String,
    schedule: Schedule,
}

impl CronTrigger {
    /// Parses a six-field cron expression (seconds first).
    pub fn new(expr: &str) -> Result<Self, ScheduleError> {
        let schedule = Schedule::from_str(expr).map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// Spawns the tick loop; it exits once `stop` is raised.
    pub fn spawn(
        self,
        orchestrator: PipelineOrchestrator,
        run_config: PipelineConfig,
        stop: CancelSignal,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(cron = %self.expr, "Schedule trigger started");
            loop {
                let now = Utc::now();
                let Some(next) = self.next_after(now) else {
                    warn!(cron = %self.expr, "Schedule has no further ticks");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(next = %next, wait_secs = wait.as_secs(), "Waiting for next tick");

                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                match orchestrator.trigger(run_config.clone()) {
                    Ok(handle) => info!(run_id = %handle.run_id, tick = %next, "Scheduled run started"),
                    Err(PipelineError::ConcurrencyConflict { active_run }) => warn!(
                        active_run = %active_run,
                        tick = %next,
                        "Scheduled tick skipped, a run is already live"
                    ),
                    Err(e) => error!(error = %e, tick = %next, "Scheduled run could not start"),
                }
            }
            info!("Schedule trigger stopped");
        })
    }
}
