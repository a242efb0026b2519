//! Validation engine: runs every stage on a record and decides its fate.

use tracing::debug;

use super::cross_reference::CrossReferenceCheck;
use super::external::ExternalCheck;
use super::schema::LeadSchema;
use super::verdict::{ConfidenceWeights, Decision, ValidationVerdict};
use crate::metrics::MetricsCollector;
use crate::records::RawRecord;

/// Three-stage validation gate.
///
/// All stages run on every record so the verdict carries the full
/// diagnostic picture. Decision order:
///
/// 1. schema failure rejects;
/// 2. a duplicate of a stored lead is quarantined;
/// 3. inconclusive external verification is quarantined;
/// 4. any other stage failure rejects;
/// 5. otherwise the record is accepted iff its confidence reaches the
///    configured threshold.
#[derive(Clone)]
pub struct ValidationEngine {
    schema: LeadSchema,
    cross_reference: CrossReferenceCheck,
    external: ExternalCheck,
    weights: ConfidenceWeights,
    min_confidence: f64,
    metrics: MetricsCollector,
}

impl ValidationEngine {
    pub fn new(
        schema: LeadSchema,
        cross_reference: CrossReferenceCheck,
        external: ExternalCheck,
        weights: ConfidenceWeights,
        min_confidence: f64,
    ) -> Self {
        Self {
            schema,
            cross_reference,
            external,
            weights,
            min_confidence,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn weights(&self) -> &ConfidenceWeights {
        &self.weights
    }

    /// First-pass validation.
    pub async fn validate(&self, record: &RawRecord) -> ValidationVerdict {
        self.validate_pass(record, 1).await
    }

    /// Validates a record on the given pass. Re-validation of quarantined
    /// records uses a pass greater than one.
    pub async fn validate_pass(&self, record: &RawRecord, pass: u32) -> ValidationVerdict {
        let schema = self.schema.check(record).to_stage_result();
        let cross = self.cross_reference.check(record);
        let external = self.external.check(record).await;

        let duplicate = cross.duplicate_of.is_some();
        let stages = vec![schema, cross.result, external.result];
        let confidence = self.weights.aggregate(&stages);

        let (decision, retryable) = if !stages[0].passed {
            (Decision::Rejected, false)
        } else if duplicate {
            (Decision::Quarantined, false)
        } else if external.inconclusive {
            (Decision::Quarantined, external.retryable)
        } else if stages.iter().any(|s| !s.passed) {
            (Decision::Rejected, false)
        } else if confidence >= self.min_confidence {
            (Decision::Accepted, false)
        } else {
            (Decision::Rejected, false)
        };

        let verdict =
            ValidationVerdict::new(record.id, pass, stages, confidence, decision, retryable);

        debug!(
            record_id = %record.id,
            pass,
            confidence = format!("{:.3}", confidence),
            decision = %decision,
            reason = verdict.reason().unwrap_or(""),
            "Record validated"
        );
        self.metrics.record_verdict(decision.as_str(), confidence);

        verdict
    }
}
