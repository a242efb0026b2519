//! Hybrid local/cloud routing.
//!
//! Every acquisition attempt asks the [`SmartRouter`] where to run. The
//! router prefers the primary venue while its circuit is closed and fails
//! over to the other venue when it trips:
//!
//! ```text
//!   route(task) ──► primary closed? ──yes──► primary
//!                        │ no
//!                        ▼
//!                 half-open probe free? ──yes──► primary (probe)
//!                        │ no
//!                        ▼
//!                     secondary (failover)
//! ```

pub mod circuit_breaker;
pub mod router;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState, VenueOutcome};
pub use router::{RouterConfig, RouterSnapshot, SmartRouter};

/// Where an acquisition attempt executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Local,
    Cloud,
}

impl Venue {
    pub fn other(self) -> Venue {
        match self {
            Venue::Local => Venue::Cloud,
            Venue::Cloud => Venue::Local,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Venue::Local => "local",
            Venue::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Venue::Local),
            "cloud" => Ok(Venue::Cloud),
            other => Err(format!("unknown venue '{}', expected local or cloud", other)),
        }
    }
}

/// Why a venue was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteReason {
    Primary,
    Failover,
    Forced,
}

impl RouteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteReason::Primary => "primary",
            RouteReason::Failover => "failover",
            RouteReason::Forced => "forced",
        }
    }
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Venue choice for one attempt of one task.
///
/// Kept on the task's attempt history and dropped with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub task_id: Uuid,
    pub venue: Venue,
    pub reason: RouteReason,
    /// Set when this attempt is the half-open recovery probe.
    pub probe: bool,
    pub decided_at: DateTime<Utc>,
}

impl RouteDecision {
    pub fn new(task_id: Uuid, venue: Venue, reason: RouteReason, probe: bool) -> Self {
        Self {
            task_id,
            venue,
            reason,
            probe,
            decided_at: Utc::now(),
        }
    }
}
