//! Auto-heal supervisor.
//!
//! Watches run summaries and starts a fresh run after a failed one, with
//! backoff and a bound on consecutive attempts. A completed run resets the
//! bound. Cancelled runs are never retried.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::PipelineConfig;
use super::orchestrator::{PipelineError, PipelineOrchestrator};
use super::state::RunState;
use crate::scheduler::{CancelSignal, RetryPolicy};

#[derive(Debug, Clone)]
pub struct AutoHealConfig {
    /// Consecutive failed runs retried before giving up.
    pub max_attempts: u32,
    /// Delay before each retry, by consecutive failure count.
    pub backoff: RetryPolicy,
}

impl Default for AutoHealConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: RetryPolicy::default(),
        }
    }
}

pub struct AutoHealSupervisor {
    orchestrator: PipelineOrchestrator,
    run_config: PipelineConfig,
    config: AutoHealConfig,
}

impl AutoHealSupervisor {
    /// `run_config` is the configuration each healing run is started with.
    pub fn new(
        orchestrator: PipelineOrchestrator,
        run_config: PipelineConfig,
        config: AutoHealConfig,
    ) -> Self {
        Self {
            orchestrator,
            run_config,
            config,
        }
    }

    /// Spawns the supervisor loop; it exits once `stop` is raised.
    pub fn spawn(self, stop: CancelSignal) -> JoinHandle<()> {
        let mut events = self.orchestrator.subscribe();
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                let summary = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(summary) => summary,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Auto-heal supervisor lagged behind run events");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                match summary.state {
                    RunState::Complete => consecutive_failures = 0,
                    RunState::Failed if summary.cancelled => {
                        info!(run_id = %summary.run_id, "Cancelled run not retried");
                    }
                    RunState::Failed => {
                        consecutive_failures += 1;
                        if consecutive_failures > self.config.max_attempts {
                            error!(
                                run_id = %summary.run_id,
                                consecutive_failures,
                                "Auto-heal giving up until a run completes"
                            );
                            continue;
                        }

                        let delay = self.config.backoff.delay_for(consecutive_failures);
                        warn!(
                            run_id = %summary.run_id,
                            error = summary.error.as_deref().unwrap_or(""),
                            attempt = consecutive_failures,
                            delay_ms = delay.as_millis() as u64,
                            "Run failed, scheduling auto-heal run"
                        );
                        tokio::select! {
                            biased;
                            _ = stop.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }

                        match self.orchestrator.trigger(self.run_config.clone()) {
                            Ok(handle) => {
                                info!(run_id = %handle.run_id, failed_run = %summary.run_id, "Auto-heal run started");
                            }
                            Err(PipelineError::ConcurrencyConflict { active_run }) => {
                                info!(active_run = %active_run, "Another run already started, auto-heal skipped");
                            }
                            Err(e) => {
                                error!(error = %e, "Auto-heal run could not start");
                            }
                        }
                    }
                    _ => {}
                }
            }
            info!("Auto-heal supervisor stopped");
        })
    }
}
