//! Per-venue circuit breaker.
//!
//! `Closed` lets traffic through. Enough consecutive failures, or a windowed
//! success ratio below the health floor, trip it `Open`. Once the recovery
//! timeout elapses the breaker goes `HalfOpen` and admits a single probe;
//! the probe's outcome either closes the breaker or reopens it with a longer
//! timeout.
//!
//! All methods take the current instant so the router can evaluate both
//! venues against one clock reading and tests can drive time explicitly.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: usize,
    /// Successful probes needed to close a half-open breaker.
    pub success_threshold: usize,
    /// Initial time spent open before probing.
    #[serde(with = "crate::pipeline::config::duration_ms")]
    pub recovery_timeout: Duration,
    /// Upper bound for the recovery timeout after repeated failed probes.
    #[serde(with = "crate::pipeline::config::duration_ms")]
    pub max_recovery_timeout: Duration,
    /// Factor applied to the recovery timeout when a probe fails.
    pub backoff_multiplier: f64,
    /// Number of recent outcomes kept for the health ratio.
    pub window_size: usize,
    /// Minimum windowed success ratio before the breaker trips.
    pub health_floor: f64,
    /// Outcomes required in the window before the health floor applies.
    pub min_samples: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            max_recovery_timeout: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            window_size: 20,
            health_floor: 0.5,
            min_samples: 10,
        }
    }
}

/// Whether a venue can take the next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Closed and healthy.
    Available,
    /// Half-open with the probe slot free.
    Probe,
    /// Open, or half-open with a probe already in flight.
    Unavailable,
}

/// Observed outcome of an attempt on a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueOutcome {
    Success,
    Failure,
    /// The attempt ended for reasons unrelated to venue health
    /// (cancellation, a source refusing the request).
    Neutral,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub health: f64,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub recovery_timeout_ms: u64,
}

/// Circuit breaker for a single venue.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    total_calls: u64,
    failed_calls: u64,
    window: VecDeque<bool>,
    last_state_change: Instant,
    current_recovery_timeout: Duration,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, now: Instant) -> Self {
        let current_recovery_timeout = config.recovery_timeout;
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_calls: 0,
            failed_calls: 0,
            window: VecDeque::new(),
            last_state_change: now,
            current_recovery_timeout,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Success ratio over the sliding window; 1.0 when empty.
    pub fn health(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let ok = self.window.iter().filter(|ok| **ok).count();
        ok as f64 / self.window.len() as f64
    }

    /// Evaluates availability, moving an expired open breaker to half-open.
    pub fn availability(&mut self, now: Instant) -> Availability {
        match self.state {
            CircuitState::Closed => Availability::Available,
            CircuitState::Open => {
                if now.saturating_duration_since(self.last_state_change)
                    >= self.current_recovery_timeout
                {
                    self.transition(CircuitState::HalfOpen, now);
                    Availability::Probe
                } else {
                    Availability::Unavailable
                }
            }
            CircuitState::HalfOpen if self.probe_in_flight => Availability::Unavailable,
            CircuitState::HalfOpen => Availability::Probe,
        }
    }

    /// Claims the half-open probe slot.
    pub fn begin_probe(&mut self) {
        self.probe_in_flight = true;
    }

    /// Feeds an attempt outcome into the breaker.
    pub fn record(&mut self, outcome: VenueOutcome, now: Instant) {
        match outcome {
            VenueOutcome::Success => self.record_success(now),
            VenueOutcome::Failure => self.record_failure(now),
            VenueOutcome::Neutral => {
                if self.state == CircuitState::HalfOpen {
                    self.probe_in_flight = false;
                }
            }
        }
    }

    fn record_success(&mut self, now: Instant) {
        self.total_calls += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.push_window(true);

        if self.state == CircuitState::HalfOpen {
            self.probe_in_flight = false;
            if self.consecutive_successes >= self.config.success_threshold {
                self.transition(CircuitState::Closed, now);
                self.current_recovery_timeout = self.config.recovery_timeout;
                // A recovered venue starts with a clean window so stale
                // failures do not trip it again immediately.
                self.window.clear();
            }
        }
    }

    fn record_failure(&mut self, now: Instant) {
        self.total_calls += 1;
        self.failed_calls += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.push_window(false);

        match self.state {
            CircuitState::Closed => {
                let unhealthy = self.window.len() >= self.config.min_samples
                    && self.health() < self.config.health_floor;
                if self.consecutive_failures >= self.config.failure_threshold || unhealthy {
                    self.transition(CircuitState::Open, now);
                    self.current_recovery_timeout = self.config.recovery_timeout;
                }
            }
            CircuitState::HalfOpen => {
                self.probe_in_flight = false;
                self.transition(CircuitState::Open, now);
                let scaled = self.current_recovery_timeout.as_millis() as f64
                    * self.config.backoff_multiplier;
                self.current_recovery_timeout = std::cmp::min(
                    Duration::from_millis(scaled as u64),
                    self.config.max_recovery_timeout,
                );
            }
            CircuitState::Open => {}
        }
    }

    fn push_window(&mut self, ok: bool) {
        if self.config.window_size == 0 {
            return;
        }
        if self.window.len() == self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(ok);
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.last_state_change = now;
        if to == CircuitState::HalfOpen {
            self.consecutive_successes = 0;
            self.probe_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            health: self.health(),
            total_calls: self.total_calls,
            failed_calls: self.failed_calls,
            recovery_timeout_ms: self.current_recovery_timeout.as_millis() as u64,
        }
    }
}
