//! Cross-reference stage: duplicate detection against stored leads and
//! category plausibility.

use std::collections::HashSet;
use std::sync::Arc;

use super::verdict::{Stage, StageResult};
use crate::records::{canonical_identifier, LeadIndex, RawRecord};

/// Categories the pipeline knows how to score.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "foreclosure",
    "pre_foreclosure",
    "auction",
    "tax_lien",
    "bank_owned",
    "short_sale",
    "probate",
    "code_violation",
    "divorce",
    "vacant",
    "distressed",
];

/// Outcome of the cross-reference stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossReferenceOutcome {
    pub result: StageResult,
    /// Set when the record matches an already-stored lead.
    pub duplicate_of: Option<String>,
}

/// Compares candidates with the lead index and category list.
#[derive(Debug, Clone)]
pub struct CrossReferenceCheck {
    index: Arc<LeadIndex>,
    known_categories: HashSet<String>,
    fuzzy_threshold: f64,
}

impl CrossReferenceCheck {
    pub fn new(index: Arc<LeadIndex>, known_categories: &[String], fuzzy_threshold: f64) -> Self {
        Self {
            index,
            known_categories: known_categories
                .iter()
                .map(|c| normalize_category(c))
                .collect(),
            fuzzy_threshold,
        }
    }

    pub fn check(&self, record: &RawRecord) -> CrossReferenceOutcome {
        let mut problems = Vec::new();

        let category = record.text("category").map(normalize_category);
        match &category {
            Some(c) if self.known_categories.contains(c) => {}
            Some(c) => problems.push(format!("category '{}' is not a known lead category", c)),
            None => problems.push("no category to cross-reference".to_string()),
        }

        let identifier = record.text("address").map(canonical_identifier);
        let closest = identifier
            .as_deref()
            .filter(|id| !id.is_empty())
            .and_then(|id| self.index.closest(id));

        if let Some(m) = &closest {
            if m.similarity >= self.fuzzy_threshold {
                return CrossReferenceOutcome {
                    result: StageResult::fail(
                        Stage::CrossReference,
                        format!(
                            "duplicate of stored lead '{}' (similarity {:.2})",
                            m.identifier, m.similarity
                        ),
                    ),
                    duplicate_of: Some(m.identifier.clone()),
                };
            }
        }

        if identifier.as_deref().map_or(true, str::is_empty) {
            problems.push("no address to cross-reference".to_string());
        }

        if !problems.is_empty() {
            return CrossReferenceOutcome {
                result: StageResult::fail(Stage::CrossReference, problems.join("; ")),
                duplicate_of: None,
            };
        }

        // A near miss that did not reach the duplicate threshold still
        // lowers confidence.
        let similarity = closest.map(|m| m.similarity).unwrap_or(0.0);
        let mut result = StageResult::pass(Stage::CrossReference, 1.0 - similarity / 2.0);
        if similarity > 0.0 {
            result = result.with_reason(format!("resembles a stored lead ({:.2})", similarity));
        }
        CrossReferenceOutcome {
            result,
            duplicate_of: None,
        }
    }
}

fn normalize_category(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Venue;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn record(payload: Value) -> RawRecord {
        let Value::Object(map) = payload else {
            unreachable!()
        };
        RawRecord::new("s", Uuid::new_v4(), Venue::Local, map)
    }

    fn check(index: Arc<LeadIndex>) -> CrossReferenceCheck {
        let categories: Vec<String> = DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect();
        CrossReferenceCheck::new(index, &categories, 0.85)
    }

    #[test]
    fn test_fresh_plausible_record_passes() {
        let outcome = check(Arc::new(LeadIndex::new()))
            .check(&record(json!({"address": "1 Main St", "category": "Tax Lien"})));
        assert!(outcome.result.passed);
        assert_eq!(outcome.result.score, 1.0);
        assert!(outcome.duplicate_of.is_none());
    }

    #[test]
    fn test_exact_duplicate_flagged() {
        let index = Arc::new(LeadIndex::new());
        index.seed([("1 main street".to_string(), Uuid::new_v4())]);
        let outcome = check(index).check(&record(json!({"address": "1 Main St.", "category": "auction"})));
        assert!(!outcome.result.passed);
        assert_eq!(outcome.duplicate_of.as_deref(), Some("1 main street"));
    }

    #[test]
    fn test_near_miss_lowers_score() {
        let index = Arc::new(LeadIndex::new());
        index.seed([("1 main street tampa".to_string(), Uuid::new_v4())]);
        let outcome = check(index).check(&record(json!({"address": "1 Main St", "category": "auction"})));
        assert!(outcome.result.passed);
        assert!((outcome.result.score - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_category_fails() {
        let outcome = check(Arc::new(LeadIndex::new()))
            .check(&record(json!({"address": "1 Main St", "category": "luxury"})));
        assert!(!outcome.result.passed);
        assert!(outcome.duplicate_of.is_none());
        assert!(outcome.result.reason.unwrap().contains("luxury"));
    }
}
