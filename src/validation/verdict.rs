//! Validation verdicts and confidence aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The three validation stages, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schema,
    CrossReference,
    External,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Schema => write!(f, "schema"),
            Stage::CrossReference => write!(f, "cross_reference"),
            Stage::External => write!(f, "external"),
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub passed: bool,
    /// Sub-score in [0, 1]; 0 whenever the stage failed.
    pub score: f64,
    /// Diagnostic detail, set on failure and on notable passes.
    #[serde(default)]
    pub reason: Option<String>,
}

impl StageResult {
    pub fn pass(stage: Stage, score: f64) -> Self {
        Self {
            stage,
            passed: true,
            score: score.clamp(0.0, 1.0),
            reason: None,
        }
    }

    pub fn fail(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            passed: false,
            score: 0.0,
            reason: Some(reason.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Gate decision for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
    Quarantined,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::Rejected => "rejected",
            Decision::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating one raw record. Never mutated; a re-validation
/// produces a new verdict with a higher `pass`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub id: Uuid,
    pub record_id: Uuid,
    /// Validation pass, starting at 1.
    pub pass: u32,
    pub stages: Vec<StageResult>,
    pub confidence: f64,
    pub decision: Decision,
    /// Quarantined only because external verification was unreachable.
    pub retryable: bool,
    pub decided_at: DateTime<Utc>,
}

impl ValidationVerdict {
    pub fn new(
        record_id: Uuid,
        pass: u32,
        stages: Vec<StageResult>,
        confidence: f64,
        decision: Decision,
        retryable: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id,
            pass,
            stages,
            confidence,
            decision,
            retryable,
            decided_at: Utc::now(),
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// First stage reason worth reporting.
    pub fn reason(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| !s.passed && s.reason.is_some())
            .or_else(|| self.stages.iter().find(|s| s.reason.is_some()))
            .and_then(|s| s.reason.as_deref())
    }
}

/// Per-stage weights for the aggregate confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub schema: f64,
    pub cross_reference: f64,
    pub external: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            schema: 0.4,
            cross_reference: 0.3,
            external: 0.3,
        }
    }
}

impl ConfidenceWeights {
    pub fn weight(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Schema => self.schema,
            Stage::CrossReference => self.cross_reference,
            Stage::External => self.external,
        }
    }

    pub fn total(&self) -> f64 {
        self.schema + self.cross_reference + self.external
    }

    /// Weighted mean `Σ wᵢ·sᵢ / Σ wᵢ` over the given stages.
    ///
    /// With non-negative weights this is non-decreasing in every sub-score.
    pub fn aggregate(&self, stages: &[StageResult]) -> f64 {
        let (weighted, total) = stages.iter().fold((0.0, 0.0), |(acc, tot), s| {
            let w = self.weight(s.stage).max(0.0);
            (acc + w * s.score.clamp(0.0, 1.0), tot + w)
        });
        if total <= 0.0 {
            0.0
        } else {
            (weighted / total).clamp(0.0, 1.0)
        }
    }
}
