//! Validated, enriched lead records ready for persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::canonical::canonical_identifier;
use super::raw::RawRecord;
use crate::analysis::EnrichmentSignals;
use crate::validation::{Decision, ValidationVerdict};

/// Namespace for deterministic lead ids derived from canonical identifiers.
const LEAD_NAMESPACE: Uuid = Uuid::from_u128(0x6c65_6164_2d73_6e69_7065_722d_6c65_6164);

/// Errors creating a lead from a verdict.
#[derive(Debug, Error, PartialEq)]
pub enum LeadError {
    #[error("Verdict {verdict_id} is {decision}, only accepted verdicts produce leads")]
    NotAccepted { verdict_id: Uuid, decision: Decision },

    #[error("Verdict {verdict_id} was issued for record {expected}, not {actual}")]
    RecordMismatch {
        verdict_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("Record {0} has no address to derive an identifier from")]
    MissingIdentifier(Uuid),
}

/// Lifecycle of a lead record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    /// Accepted by validation, not yet persisted.
    Validated,
    /// Persisted by the sink dispatcher.
    Stored,
    /// Skipped because a lead with the same canonical identifier exists.
    Duplicate,
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadStatus::Validated => write!(f, "validated"),
            LeadStatus::Stored => write!(f, "stored"),
            LeadStatus::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// A lead that cleared validation.
///
/// The id is derived from the canonical identifier, so every write of the
/// same lead lands on the same key in every sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadRecord {
    pub id: Uuid,
    /// Canonical identifier used for deduplication.
    pub identifier: String,
    /// Address as scraped.
    pub address: String,
    pub category: String,
    pub source_id: String,
    pub acquired_at: DateTime<Utc>,
    /// Aggregate confidence of the accepting verdict.
    pub confidence: f64,
    /// Score assigned by the analysis stage, 0-100.
    pub predictive_score: Option<f64>,
    /// Derived signals keyed by name.
    pub enrichment: BTreeMap<String, Value>,
    pub status: LeadStatus,
    /// Verdict that accepted the record.
    pub verdict_id: Uuid,
    /// Raw record the lead was built from.
    pub record_id: Uuid,
    /// Scraped fields, kept for downstream consumers.
    pub fields: serde_json::Map<String, Value>,
}

impl LeadRecord {
    /// Builds a lead from a record and its accepting verdict.
    pub fn from_accepted(record: &RawRecord, verdict: &ValidationVerdict) -> Result<Self, LeadError> {
        if verdict.decision != Decision::Accepted {
            return Err(LeadError::NotAccepted {
                verdict_id: verdict.id,
                decision: verdict.decision,
            });
        }
        if verdict.record_id != record.id {
            return Err(LeadError::RecordMismatch {
                verdict_id: verdict.id,
                expected: verdict.record_id,
                actual: record.id,
            });
        }

        let address = record
            .text("address")
            .ok_or(LeadError::MissingIdentifier(record.id))?
            .to_string();
        let identifier = canonical_identifier(&address);
        if identifier.is_empty() {
            return Err(LeadError::MissingIdentifier(record.id));
        }

        Ok(Self {
            id: lead_id(&identifier),
            identifier,
            address,
            category: record
                .text("category")
                .map(|c| c.to_lowercase())
                .unwrap_or_default(),
            source_id: record.source_id.clone(),
            acquired_at: record.acquired_at,
            confidence: verdict.confidence,
            predictive_score: None,
            enrichment: BTreeMap::new(),
            status: LeadStatus::Validated,
            verdict_id: verdict.id,
            record_id: record.id,
            fields: record.payload.clone(),
        })
    }

    /// Attaches analysis output.
    pub fn with_enrichment(mut self, signals: EnrichmentSignals) -> Self {
        self.predictive_score = Some(signals.predictive_score);
        self.enrichment = signals.signals;
        self
    }

    /// Priority label set by the analyzer, if any.
    pub fn priority(&self) -> Option<&str> {
        self.enrichment.get("priority").and_then(Value::as_str)
    }
}

/// Deterministic lead id for a canonical identifier.
pub fn lead_id(identifier: &str) -> Uuid {
    Uuid::new_v5(&LEAD_NAMESPACE, identifier.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Venue;
    use crate::validation::{Stage, StageResult};
    use serde_json::json;

    fn raw(address: &str) -> RawRecord {
        let Value::Object(map) = json!({"address": address, "category": "Foreclosure"}) else {
            unreachable!()
        };
        RawRecord::new("src", Uuid::new_v4(), Venue::Local, map)
    }

    fn verdict(record: &RawRecord, decision: Decision) -> ValidationVerdict {
        ValidationVerdict::new(
            record.id,
            1,
            vec![StageResult::pass(Stage::Schema, 1.0)],
            0.9,
            decision,
            false,
        )
    }

    #[test]
    fn test_from_accepted() {
        let record = raw("12 Oak St.");
        let v = verdict(&record, Decision::Accepted);
        let lead = LeadRecord::from_accepted(&record, &v).unwrap();

        assert_eq!(lead.identifier, "12 oak street");
        assert_eq!(lead.category, "foreclosure");
        assert_eq!(lead.verdict_id, v.id);
        assert_eq!(lead.record_id, record.id);
        assert_eq!(lead.status, LeadStatus::Validated);
        assert_eq!(lead.id, lead_id("12 oak street"));
    }

    #[test]
    fn test_same_identifier_same_id() {
        let a = raw("12 Oak St.");
        let b = raw("12 oak street");
        let la = LeadRecord::from_accepted(&a, &verdict(&a, Decision::Accepted)).unwrap();
        let lb = LeadRecord::from_accepted(&b, &verdict(&b, Decision::Accepted)).unwrap();
        assert_eq!(la.id, lb.id);
        assert_ne!(la.record_id, lb.record_id);
    }

    #[test]
    fn test_rejects_non_accepted() {
        let record = raw("12 Oak St.");
        for decision in [Decision::Rejected, Decision::Quarantined] {
            let err = LeadRecord::from_accepted(&record, &verdict(&record, decision)).unwrap_err();
            assert!(matches!(err, LeadError::NotAccepted { .. }));
        }
    }

    #[test]
    fn test_rejects_mismatched_record() {
        let record = raw("12 Oak St.");
        let other = raw("14 Oak St.");
        let err =
            LeadRecord::from_accepted(&other, &verdict(&record, Decision::Accepted)).unwrap_err();
        assert!(matches!(err, LeadError::RecordMismatch { .. }));
    }
}
