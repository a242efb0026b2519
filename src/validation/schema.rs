//! Schema stage: field presence, type and format against the canonical
//! lead shape.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::verdict::{Stage, StageResult};
use crate::records::RawRecord;

/// Score lost per malformed optional field.
const OPTIONAL_FIELD_PENALTY: f64 = 0.2;

/// Expected type and format of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Non-empty text, optionally matching a pattern.
    Text {
        min_len: usize,
        pattern: Option<Regex>,
    },
    /// Number (or numeric string) within an inclusive range.
    Number { min: f64, max: f64 },
}

/// Rule for a single payload field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldRule {
    pub fn text(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            required,
            kind: FieldKind::Text {
                min_len: 1,
                pattern: None,
            },
        }
    }

    pub fn number(name: impl Into<String>, required: bool, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            required,
            kind: FieldKind::Number { min, max },
        }
    }

    pub fn with_min_len(mut self, len: usize) -> Self {
        if let FieldKind::Text { min_len, .. } = &mut self.kind {
            *min_len = len;
        }
        self
    }

    pub fn with_pattern(mut self, re: Regex) -> Self {
        if let FieldKind::Text { pattern, .. } = &mut self.kind {
            *pattern = Some(re);
        }
        self
    }

    fn check(&self, record: &RawRecord) -> Option<FieldError> {
        let Some(value) = record.payload.get(&self.name).filter(|v| !v.is_null()) else {
            return self
                .required
                .then(|| FieldError::new(&self.name, "required field is missing"));
        };

        match &self.kind {
            FieldKind::Text { min_len, pattern } => {
                let Value::String(s) = value else {
                    return Some(FieldError::new(&self.name, "expected text"));
                };
                let s = s.trim();
                if s.chars().count() < *min_len {
                    return Some(FieldError::new(
                        &self.name,
                        format!("must be at least {} characters", min_len),
                    ));
                }
                if let Some(re) = pattern {
                    if !re.is_match(s) {
                        return Some(FieldError::new(&self.name, "has an invalid format"));
                    }
                }
                None
            }
            FieldKind::Number { min, max } => match record.number(&self.name) {
                None => Some(FieldError::new(&self.name, "expected a number")),
                Some(n) if !n.is_finite() || n < *min || n > *max => Some(FieldError::new(
                    &self.name,
                    format!("{} is outside [{}, {}]", n, min, max),
                )),
                Some(_) => None,
            },
        }
    }
}

/// A field that failed its rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Detailed schema result.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaReport {
    /// Required-field violations; any makes the stage fail.
    pub errors: Vec<FieldError>,
    /// Malformed optional fields; these lower the score.
    pub warnings: Vec<FieldError>,
}

impl SchemaReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_stage_result(&self) -> StageResult {
        if !self.passed() {
            return StageResult::fail(Stage::Schema, describe(&self.errors));
        }
        let score = (1.0 - OPTIONAL_FIELD_PENALTY * self.warnings.len() as f64).max(0.0);
        let result = StageResult::pass(Stage::Schema, score);
        if self.warnings.is_empty() {
            result
        } else {
            result.with_reason(describe(&self.warnings))
        }
    }
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Canonical lead shape.
#[derive(Debug, Clone)]
pub struct LeadSchema {
    rules: Vec<FieldRule>,
}

impl LeadSchema {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// The shape every lead must have: a street address and a category,
    /// plus typed optional market fields.
    pub fn canonical() -> Result<Self, regex::Error> {
        Ok(Self::new(vec![
            FieldRule::text("address", true)
                .with_min_len(5)
                .with_pattern(Regex::new(r"^\d+[A-Za-z]?(-\d+)?\s+\S+")?),
            FieldRule::text("category", true)
                .with_min_len(3)
                .with_pattern(Regex::new(r"^[A-Za-z][A-Za-z _-]*$")?),
            FieldRule::number("list_price", false, 0.0, 1e10),
            FieldRule::number("estimated_value", false, 0.0, 1e10),
            FieldRule::number("roi_percent", false, -100.0, 10_000.0),
            FieldRule::number("opportunity_score", false, 0.0, 100.0),
            FieldRule::text("contact", false).with_min_len(3),
        ]))
    }

    pub fn check(&self, record: &RawRecord) -> SchemaReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for rule in &self.rules {
            if let Some(err) = rule.check(record) {
                if rule.required {
                    errors.push(err);
                } else {
                    warnings.push(err);
                }
            }
        }
        SchemaReport { errors, warnings }
    }

    /// Names of the required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|r| r.required)
            .map(|r| r.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Venue;
    use serde_json::json;
    use uuid::Uuid;

    fn record(payload: Value) -> RawRecord {
        let Value::Object(map) = payload else {
            unreachable!()
        };
        RawRecord::new("s", Uuid::new_v4(), Venue::Local, map)
    }

    fn schema() -> LeadSchema {
        LeadSchema::canonical().unwrap()
    }

    #[test]
    fn test_valid_record_scores_one() {
        let report = schema().check(&record(json!({
            "address": "123 Main St, Tampa FL",
            "category": "foreclosure",
            "list_price": 180000,
        })));
        assert!(report.passed());
        let result = report.to_stage_result();
        assert!(result.passed);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let report = schema().check(&record(json!({"category": "auction"})));
        assert!(!report.passed());
        assert_eq!(report.errors[0].field, "address");
        let result = report.to_stage_result();
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
        assert!(result.reason.unwrap().contains("address"));
    }

    #[test]
    fn test_bad_format_fails() {
        let report = schema().check(&record(json!({
            "address": "Main Street",
            "category": "auction",
        })));
        assert!(!report.passed());
    }

    #[test]
    fn test_wrong_type_fails() {
        let report = schema().check(&record(json!({
            "address": 123,
            "category": "auction",
        })));
        assert_eq!(report.errors[0].message, "expected text");
    }

    #[test]
    fn test_malformed_optional_field_lowers_score() {
        let report = schema().check(&record(json!({
            "address": "9 Bay Rd",
            "category": "tax_lien",
            "list_price": "call for price",
            "opportunity_score": 140,
        })));
        assert!(report.passed());
        assert_eq!(report.warnings.len(), 2);
        let result = report.to_stage_result();
        assert!((result.score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_required_fields() {
        let binding = schema();
        let fields: Vec<_> = binding.required_fields().collect();
        assert_eq!(fields, vec!["address", "category"]);
    }
}
