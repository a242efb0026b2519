//! Raw records as produced by acquisition workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::routing::Venue;
use crate::scheduler::Task;

/// Scraped key/value fields, kept opaque until validation.
pub type Payload = Map<String, Value>;

/// Unvalidated output of a single acquisition task.
///
/// Immutable once produced and consumed exactly once by the validation
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    /// Unique record identifier.
    pub id: Uuid,
    /// Identifier of the source that produced the record.
    pub source_id: String,
    /// Task that produced the record.
    pub task_id: Uuid,
    /// Venue the successful attempt ran on.
    pub venue: Venue,
    /// When the record was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Fields as scraped.
    pub payload: Payload,
}

impl RawRecord {
    /// Creates a new record stamped with the current time.
    pub fn new(source_id: impl Into<String>, task_id: Uuid, venue: Venue, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            task_id,
            venue,
            acquired_at: Utc::now(),
            payload,
        }
    }

    /// Wraps the payload a task produced, filling in the task's category hint
    /// when the source did not report one.
    pub fn from_task(task: &Task, venue: Venue, mut payload: Payload) -> Self {
        if let Some(hint) = &task.category_hint {
            payload
                .entry("category")
                .or_insert_with(|| Value::String(hint.clone()));
        }
        Self::new(&task.source_id, task.id, venue, payload)
    }

    /// Returns a field as a trimmed, non-empty string.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.payload
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns a numeric field, accepting numbers encoded as strings.
    pub fn number(&self, field: &str) -> Option<f64> {
        match self.payload.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace([',', '$'], "").parse().ok(),
            _ => None,
        }
    }

    /// SHA-256 over the payload's canonical JSON encoding.
    ///
    /// `serde_json::Map` is ordered by key, so equal payloads always hash
    /// identically regardless of scrape order.
    pub fn fingerprint(&self) -> String {
        let encoded = Value::Object(self.payload.clone()).to_string();
        hex::encode(Sha256::digest(encoded.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(payload: Value) -> RawRecord {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        RawRecord::new("county-records", Uuid::new_v4(), Venue::Local, map)
    }

    #[test]
    fn test_text_trims_and_skips_empty() {
        let r = record(json!({"address": "  12 Oak St ", "category": "   "}));
        assert_eq!(r.text("address"), Some("12 Oak St"));
        assert_eq!(r.text("category"), None);
        assert_eq!(r.text("missing"), None);
    }

    #[test]
    fn test_number_parses_strings() {
        let r = record(json!({"list_price": "$125,000", "roi_percent": 42.5, "bad": "n/a"}));
        assert_eq!(r.number("list_price"), Some(125_000.0));
        assert_eq!(r.number("roi_percent"), Some(42.5));
        assert_eq!(r.number("bad"), None);
    }

    #[test]
    fn test_from_task_fills_category_hint() {
        let task = Task::new("auctions", "https://auctions.example/7").with_category_hint("auction");
        let Value::Object(map) = json!({"address": "7 Elm St"}) else {
            unreachable!()
        };
        let r = RawRecord::from_task(&task, Venue::Cloud, map);
        assert_eq!(r.text("category"), Some("auction"));
        assert_eq!(r.task_id, task.id);
        assert_eq!(r.venue, Venue::Cloud);

        let Value::Object(map) = json!({"address": "7 Elm St", "category": "probate"}) else {
            unreachable!()
        };
        let r = RawRecord::from_task(&task, Venue::Local, map);
        assert_eq!(r.text("category"), Some("probate"));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = record(json!({"address": "1 Main St", "category": "auction"}));
        let b = record(json!({"category": "auction", "address": "1 Main St"}));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
