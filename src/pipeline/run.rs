//! Pipeline run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

use super::progress::{CounterSnapshot, RunCounters};
use super::state::RunState;

/// Audit record of a run, as reported to callers and kept in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub counters: CounterSnapshot,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// The run ended because it was cancelled.
    #[serde(default)]
    pub cancelled: bool,
}

impl RunSummary {
    pub fn duration_secs(&self) -> Option<f64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Handle returned by a non-blocking trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: Uuid,
}

/// A run in flight, owned by the task driving it.
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub counters: RunCounters,
    state: RunState,
    warnings: Vec<String>,
    error: Option<String>,
    cancelled: bool,
    ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            counters: RunCounters::new(),
            state: RunState::Init,
            warnings: Vec::new(),
            error: None,
            cancelled: false,
            ended_at: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Moves to the next state. Illegal transitions are ignored and logged.
    pub fn transition(&mut self, target: RunState) -> bool {
        if !self.state.can_transition_to(target) {
            warn!(
                run_id = %self.run_id,
                from = %self.state,
                to = %target,
                "Ignoring illegal run state transition"
            );
            return false;
        }
        info!(run_id = %self.run_id, from = %self.state, to = %target, "Run state changed");
        self.state = target;
        if target.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        true
    }

    /// Advances to the state following the current one.
    pub fn advance(&mut self) -> bool {
        match self.state.next() {
            Some(next) => self.transition(next),
            None => false,
        }
    }

    /// Moves to `FAILED` with the error recorded.
    pub fn fail(&mut self, error: impl ToString, cancelled: bool) {
        let error = error.to_string();
        warn!(run_id = %self.run_id, state = %self.state, error = %error, "Run failed");
        self.error = Some(error);
        self.cancelled = cancelled;
        self.transition(RunState::Failed);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(run_id = %self.run_id, warning = %message, "Run warning");
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            state: self.state,
            started_at: self.started_at,
            ended_at: self.ended_at,
            counters: self.counters.snapshot(),
            warnings: self.warnings.clone(),
            error: self.error.clone(),
            cancelled: self.cancelled,
        }
    }
}

/// Bounded history of runs, newest last.
#[derive(Debug)]
pub struct RunRegistry {
    runs: Mutex<VecDeque<RunSummary>>,
    capacity: usize,
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            runs: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RunSummary>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records or replaces the summary for its run.
    pub fn upsert(&self, summary: RunSummary) {
        let mut runs = self.lock();
        if let Some(existing) = runs.iter_mut().find(|r| r.run_id == summary.run_id) {
            *existing = summary;
            return;
        }
        runs.push_back(summary);
        // Evict the oldest finished runs first; a live run is never dropped.
        while runs.len() > self.capacity {
            match runs.iter().position(|r| r.state.is_terminal()) {
                Some(idx) => {
                    runs.remove(idx);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, run_id: Uuid) -> Option<RunSummary> {
        self.lock().iter().find(|r| r.run_id == run_id).cloned()
    }

    /// All retained runs, newest first.
    pub fn list(&self) -> Vec<RunSummary> {
        self.lock().iter().rev().cloned().collect()
    }

    /// The run that has not reached a terminal state, if any.
    pub fn active(&self) -> Option<RunSummary> {
        self.lock().iter().find(|r| !r.state.is_terminal()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
