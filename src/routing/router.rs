//! Venue selection for acquisition tasks.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::circuit_breaker::{
    Availability, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState, VenueOutcome,
};
use super::{RouteDecision, RouteReason, Venue};
use crate::metrics::MetricsCollector;
use crate::scheduler::Task;

/// Router tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Venue preferred while healthy.
    pub primary: Venue,
    /// Pins every decision to one venue.
    pub force_venue: Option<Venue>,
    /// Breaker settings applied to both venues.
    pub breaker: BreakerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            primary: Venue::Local,
            force_venue: None,
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug)]
struct VenueBreakers {
    local: CircuitBreaker,
    cloud: CircuitBreaker,
}

impl VenueBreakers {
    fn get_mut(&mut self, venue: Venue) -> &mut CircuitBreaker {
        match venue {
            Venue::Local => &mut self.local,
            Venue::Cloud => &mut self.cloud,
        }
    }

    fn get(&self, venue: Venue) -> &CircuitBreaker {
        match venue {
            Venue::Local => &self.local,
            Venue::Cloud => &self.cloud,
        }
    }
}

/// Health of both venues, as reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RouterSnapshot {
    pub primary: Venue,
    pub force_venue: Option<Venue>,
    pub local: BreakerSnapshot,
    pub cloud: BreakerSnapshot,
}

/// Chooses an execution venue for each task.
///
/// Decisions are made synchronously under a short critical section, so
/// routing never blocks dispatch on I/O. Attempt outcomes flow back through
/// [`SmartRouter::record`].
#[derive(Debug)]
pub struct SmartRouter {
    config: RouterConfig,
    breakers: Mutex<VenueBreakers>,
    metrics: MetricsCollector,
}

impl SmartRouter {
    pub fn new(config: RouterConfig) -> Self {
        let now = Instant::now();
        let breakers = VenueBreakers {
            local: CircuitBreaker::new(config.breaker.clone(), now),
            cloud: CircuitBreaker::new(config.breaker.clone(), now),
        };
        Self {
            config,
            breakers: Mutex::new(breakers),
            metrics: MetricsCollector::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VenueBreakers> {
        // Breaker state stays consistent even if a holder panicked: every
        // mutation completes before the guard is released.
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides where `task` runs.
    pub fn route(&self, task: &Task) -> RouteDecision {
        let decision = self.decide(task);
        self.metrics
            .record_route(decision.venue.as_str(), decision.reason.as_str());
        debug!(
            task_id = %task.id,
            venue = %decision.venue,
            reason = %decision.reason,
            probe = decision.probe,
            "Routed task"
        );
        decision
    }

    fn decide(&self, task: &Task) -> RouteDecision {
        if let Some(venue) = self.config.force_venue {
            return RouteDecision::new(task.id, venue, RouteReason::Forced, false);
        }

        let now = Instant::now();
        let primary = self.config.primary;
        let secondary = primary.other();
        let mut breakers = self.lock();

        match breakers.get_mut(primary).availability(now) {
            Availability::Available => {
                return RouteDecision::new(task.id, primary, RouteReason::Primary, false)
            }
            Availability::Probe => {
                breakers.get_mut(primary).begin_probe();
                info!(task_id = %task.id, venue = %primary, "Probing recovering venue");
                return RouteDecision::new(task.id, primary, RouteReason::Primary, true);
            }
            Availability::Unavailable => {}
        }

        match breakers.get_mut(secondary).availability(now) {
            Availability::Available => {
                RouteDecision::new(task.id, secondary, RouteReason::Failover, false)
            }
            Availability::Probe => {
                breakers.get_mut(secondary).begin_probe();
                RouteDecision::new(task.id, secondary, RouteReason::Failover, true)
            }
            Availability::Unavailable => {
                // Nowhere healthy to go; stay on the primary so its breaker
                // keeps receiving signal.
                warn!(task_id = %task.id, "Both venues unavailable, routing to primary");
                RouteDecision::new(task.id, primary, RouteReason::Primary, false)
            }
        }
    }

    /// Feeds an attempt outcome back to the venue's breaker.
    pub fn record(&self, venue: Venue, outcome: VenueOutcome) {
        let mut breakers = self.lock();
        let breaker = breakers.get_mut(venue);
        let before = breaker.state();
        breaker.record(outcome, Instant::now());
        let after = breaker.state();
        drop(breakers);

        if before != after {
            match after {
                CircuitState::Open => {
                    warn!(venue = %venue, from = %before, "Venue circuit opened")
                }
                _ => info!(venue = %venue, from = %before, to = %after, "Venue circuit changed"),
            }
            self.metrics.record_circuit_state(venue.as_str(), after);
        }
    }

    /// Current breaker state for a venue.
    pub fn state(&self, venue: Venue) -> CircuitState {
        self.lock().get(venue).state()
    }

    pub fn snapshot(&self) -> RouterSnapshot {
        let breakers = self.lock();
        RouterSnapshot {
            primary: self.config.primary,
            force_venue: self.config.force_venue,
            local: breakers.local.snapshot(),
            cloud: breakers.cloud.snapshot(),
        }
    }
}
