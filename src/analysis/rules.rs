//! Rule-based lead scoring, used when no scoring service is configured.

use async_trait::async_trait;
use serde_json::Value;

use super::{Analyzer, EnrichmentSignals, Priority};
use crate::error::CapabilityError;
use crate::records::LeadRecord;

const BASE_SCORE: f64 = 50.0;
const VERIFIED_BONUS: f64 = 10.0;

fn category_bonus(category: &str) -> f64 {
    match category {
        "foreclosure" => 25.0,
        "auction" | "tax_lien" => 20.0,
        "bank_owned" => 15.0,
        "short_sale" | "probate" => 10.0,
        "code_violation" => 5.0,
        _ => 0.0,
    }
}

fn distress_level(category: &str) -> f64 {
    match category {
        "foreclosure" => 0.9,
        "auction" => 0.85,
        "pre_foreclosure" => 0.8,
        "tax_lien" => 0.75,
        "bank_owned" | "distressed" => 0.7,
        "short_sale" => 0.65,
        "probate" => 0.6,
        "divorce" => 0.55,
        "code_violation" | "vacant" => 0.5,
        _ => 0.3,
    }
}

fn roi_bonus(roi: f64) -> f64 {
    if roi > 100.0 {
        20.0
    } else if roi > 50.0 {
        10.0
    } else if roi > 25.0 {
        5.0
    } else {
        0.0
    }
}

/// Heuristic scorer over category, return on investment and verification.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedAnalyzer;

impl RuleBasedAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Return on investment in percent, from `roi_percent` or derived from
    /// `estimated_value` and `list_price`.
    fn roi(lead: &LeadRecord) -> Option<f64> {
        if let Some(roi) = number(lead, "roi_percent") {
            return Some(roi);
        }
        let value = number(lead, "estimated_value")?;
        let price = number(lead, "list_price").filter(|p| *p > 0.0)?;
        Some((value - price) / price * 100.0)
    }

    /// Scores a lead without I/O.
    pub fn score(&self, lead: &LeadRecord) -> EnrichmentSignals {
        let category = lead.category.replace([' ', '-'], "_");
        let roi = Self::roi(lead);
        let verified = matches!(lead.fields.get("verified"), Some(Value::Bool(true)));

        let mut score = BASE_SCORE + category_bonus(&category);
        if let Some(roi) = roi {
            score += roi_bonus(roi);
        }
        if verified {
            score += VERIFIED_BONUS;
        }
        let score = score.min(100.0);

        let distress = distress_level(&category);
        let opportunity = number(lead, "opportunity_score")
            .map(|s| s / 100.0)
            .or_else(|| roi.map(|r| r.clamp(0.0, 100.0) / 100.0))
            .unwrap_or(0.0);
        let risk = if lead.confidence < 0.75 || roi.is_some_and(|r| r < 0.0) {
            "HIGH"
        } else if lead.confidence < 0.9 {
            "MEDIUM"
        } else {
            "LOW"
        };
        let priority = Priority::classify(score, lead.confidence);

        let mut signals = EnrichmentSignals::new(score)
            .with_signal("distress_score", distress)
            .with_signal("opportunity_score", opportunity)
            .with_signal("risk_level", risk)
            .with_signal("priority", priority.as_str())
            .with_signal("recommended_action", priority.action());
        if let Some(roi) = roi {
            signals = signals.with_signal("roi_percent", roi);
        }
        signals
    }
}

fn number(lead: &LeadRecord, field: &str) -> Option<f64> {
    match lead.fields.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace([',', '$'], "").parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Analyzer for RuleBasedAnalyzer {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn analyze(&self, lead: &LeadRecord) -> Result<EnrichmentSignals, CapabilityError> {
        Ok(self.score(lead))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Venue;
    use crate::records::RawRecord;
    use crate::validation::{Decision, Stage, StageResult, ValidationVerdict};
    use serde_json::json;
    use uuid::Uuid;

    fn lead(payload: Value, confidence: f64) -> LeadRecord {
        let Value::Object(map) = payload else {
            unreachable!()
        };
        let record = RawRecord::new("county", Uuid::new_v4(), Venue::Local, map);
        let verdict = ValidationVerdict::new(
            record.id,
            1,
            vec![StageResult::pass(Stage::Schema, 1.0)],
            confidence,
            Decision::Accepted,
            false,
        );
        LeadRecord::from_accepted(&record, &verdict).unwrap()
    }

    #[test]
    fn test_foreclosure_with_high_roi_is_critical() {
        let l = lead(
            json!({"address": "1 Main St", "category": "Foreclosure", "roi_percent": 120, "verified": true}),
            0.95,
        );
        let s = RuleBasedAnalyzer::new().score(&l);
        assert_eq!(s.predictive_score, 100.0);
        assert_eq!(s.signals["priority"], json!("CRITICAL"));
        assert_eq!(s.signals["recommended_action"], json!("IMMEDIATE_CONTACT"));
        assert_eq!(s.signals["risk_level"], json!("LOW"));
    }

    #[test]
    fn test_roi_derived_from_prices() {
        let l = lead(
            json!({"address": "1 Main St", "category": "probate", "list_price": "$100,000", "estimated_value": 160000}),
            0.8,
        );
        let s = RuleBasedAnalyzer::new().score(&l);
        // 50 base + 10 probate + 10 for a 60% return
        assert_eq!(s.predictive_score, 70.0);
        assert_eq!(s.signals["priority"], json!("HIGH"));
        let roi = s.signals["roi_percent"].as_f64().unwrap();
        assert!((roi - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_category_scores_base() {
        let l = lead(json!({"address": "1 Main St", "category": "vacant"}), 0.7);
        let s = RuleBasedAnalyzer::new().score(&l);
        assert_eq!(s.predictive_score, 50.0);
        assert_eq!(s.signals["priority"], json!("MEDIUM"));
        assert_eq!(s.signals["risk_level"], json!("HIGH"));
        assert!(!s.signals.contains_key("roi_percent"));
    }
}
