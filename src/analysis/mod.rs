//! Analysis of accepted leads.
//!
//! The scoring model is an external capability reached through the
//! [`Analyzer`] trait. [`AnalysisStage`] fans accepted leads out to it with
//! bounded parallelism, a per-call deadline and retry/backoff.

pub mod http;
pub mod rules;
pub mod stage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CapabilityError;
use crate::records::LeadRecord;

pub use http::HttpAnalyzer;
pub use rules::RuleBasedAnalyzer;
pub use stage::{AnalysisError, AnalysisOutcome, AnalysisStage};

/// Output of one analysis: a predictive score in [0, 100] plus named signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSignals {
    pub predictive_score: f64,
    #[serde(default)]
    pub signals: BTreeMap<String, Value>,
}

impl EnrichmentSignals {
    pub fn new(predictive_score: f64) -> Self {
        Self {
            predictive_score,
            signals: BTreeMap::new(),
        }
    }

    pub fn with_signal(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.signals.insert(name.into(), value.into());
        self
    }
}

/// Scoring capability.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, lead: &LeadRecord) -> Result<EnrichmentSignals, CapabilityError>;
}

/// Follow-up priority of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Priority for a predictive score and validation confidence.
    pub fn classify(score: f64, confidence: f64) -> Self {
        if score >= 80.0 && confidence >= 0.8 {
            Priority::Critical
        } else if score >= 70.0 {
            Priority::High
        } else if score >= 50.0 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }

    /// Recommended follow-up action.
    pub fn action(self) -> &'static str {
        match self {
            Priority::Critical => "IMMEDIATE_CONTACT",
            Priority::High => "SCHEDULE_FOLLOWUP",
            Priority::Medium => "ADD_TO_NURTURE",
            Priority::Low => "MONITOR",
        }
    }

    pub fn all() -> [Priority; 4] {
        [
            Priority::Critical,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ]
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_classify() {
        assert_eq!(Priority::classify(85.0, 0.9), Priority::Critical);
        assert_eq!(Priority::classify(85.0, 0.7), Priority::High);
        assert_eq!(Priority::classify(70.0, 0.1), Priority::High);
        assert_eq!(Priority::classify(50.0, 1.0), Priority::Medium);
        assert_eq!(Priority::classify(49.9, 1.0), Priority::Low);
    }

    #[test]
    fn test_priority_action() {
        assert_eq!(Priority::Critical.action(), "IMMEDIATE_CONTACT");
        assert_eq!(Priority::Low.action(), "MONITOR");
        assert_eq!(
            serde_json::to_string(&Priority::Critical).unwrap(),
            "\"CRITICAL\""
        );
    }

    #[test]
    fn test_signals_builder() {
        let s = EnrichmentSignals::new(72.0).with_signal("priority", "HIGH");
        assert_eq!(s.signals["priority"], Value::from("HIGH"));
    }
}
