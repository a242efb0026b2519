//! Flat CSV export of the leads stored by a run.
//!
//! Nested objects are flattened one level as `parent_child` columns. The
//! header is the sorted union of every row's columns; missing cells are empty.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::records::LeadRecord;

const SEP: char = ',';

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flattens one lead into column/value pairs.
pub fn flatten(lead: &LeadRecord) -> io::Result<BTreeMap<String, String>> {
    let Value::Object(top) = serde_json::to_value(lead)? else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "lead did not serialize to an object",
        ));
    };

    let mut flat = BTreeMap::new();
    for (key, value) in top {
        match value {
            Value::Object(nested) => {
                for (sub, sub_value) in nested {
                    flat.insert(format!("{}_{}", key, sub), cell(&sub_value));
                }
            }
            other => {
                flat.insert(key, cell(&other));
            }
        }
    }
    Ok(flat)
}

fn needs_quotes(field: &str) -> bool {
    field.contains(SEP) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(w: &mut W, row: &[&str]) -> io::Result<()> {
    for (i, field) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{}", SEP)?;
        }
        if needs_quotes(field) {
            write!(w, "\"{}\"", field.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", field)?;
        }
    }
    writeln!(w)
}

/// Renders `leads` as CSV with a header row.
pub fn render(leads: &[LeadRecord]) -> io::Result<Vec<u8>> {
    let rows = leads.iter().map(flatten).collect::<io::Result<Vec<_>>>()?;
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    let columns: Vec<&str> = columns.into_iter().collect();

    let mut out = Vec::new();
    write_row(&mut out, &columns)?;
    for row in &rows {
        let cells: Vec<&str> = columns
            .iter()
            .map(|c| row.get(*c).map(String::as_str).unwrap_or(""))
            .collect();
        write_row(&mut out, &cells)?;
    }
    Ok(out)
}

/// Path of the export for `run_id` inside `leads_dir`.
pub fn path_in(leads_dir: &Path, run_id: Uuid) -> PathBuf {
    leads_dir.join(format!("leads_{}.csv", run_id))
}

/// Writes the export. Nothing is written for an empty batch.
pub async fn write_leads_csv(
    leads_dir: &Path,
    run_id: Uuid,
    leads: &[LeadRecord],
) -> io::Result<Option<PathBuf>> {
    if leads.is_empty() {
        return Ok(None);
    }
    let body = render(leads)?;
    tokio::fs::create_dir_all(leads_dir).await?;
    let path = path_in(leads_dir, run_id);
    tokio::fs::write(&path, body).await?;
    info!(run_id = %run_id, rows = leads.len(), path = %path.display(), "Lead CSV written");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::EnrichmentSignals;
    use crate::records::RawRecord;
    use crate::routing::Venue;
    use crate::validation::{Decision, Stage, StageResult, ValidationVerdict};
    use serde_json::json;

    fn lead(fields: Value) -> LeadRecord {
        let Value::Object(map) = fields else {
            unreachable!()
        };
        let record = RawRecord::new("county", Uuid::new_v4(), Venue::Local, map);
        let verdict = ValidationVerdict::new(
            record.id,
            1,
            vec![StageResult::pass(Stage::Schema, 1.0)],
            0.8,
            Decision::Accepted,
            false,
        );
        LeadRecord::from_accepted(&record, &verdict).unwrap()
    }

    fn parse(csv: &[u8]) -> Vec<String> {
        String::from_utf8(csv.to_vec())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_nested_objects_become_prefixed_columns() {
        let lead = lead(json!({"address": "4 Elm St", "category": "probate", "list_price": 180000}))
            .with_enrichment(EnrichmentSignals::new(72.0).with_signal("priority", "HIGH"));
        let flat = flatten(&lead).unwrap();

        assert_eq!(flat["address"], "4 Elm St");
        assert_eq!(flat["fields_list_price"], "180000");
        assert_eq!(flat["enrichment_priority"], "HIGH");
        assert_eq!(flat["predictive_score"], "72.0");
        assert!(!flat.contains_key("fields"));
    }

    #[test]
    fn test_header_is_union_of_columns() {
        let plain = lead(json!({"address": "1 Oak Ave", "category": "auction"}));
        let priced = lead(json!({"address": "2 Oak Ave", "category": "auction", "list_price": 99000}));
        let lines = parse(&render(&[plain, priced]).unwrap());

        assert_eq!(lines.len(), 3);
        let header: Vec<&str> = lines[0].split(',').collect();
        let mut sorted = header.clone();
        sorted.sort();
        assert_eq!(header, sorted);
        let price_col = header.iter().position(|c| *c == "fields_list_price").unwrap();
        assert_eq!(lines[1].split(',').nth(price_col), Some(""));
    }

    #[test]
    fn test_cells_with_separators_are_quoted() {
        let mut out = Vec::new();
        write_row(&mut out, &["12 Bay Rd, Unit 4", "say \"hi\"", "plain"]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\"12 Bay Rd, Unit 4\",\"say \"\"hi\"\"\",plain\n"
        );
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let leads_dir = dir.path().join("leads");
        let written = write_leads_csv(&leads_dir, Uuid::new_v4(), &[]).await.unwrap();
        assert!(written.is_none());
        assert!(!leads_dir.exists());
    }

    #[tokio::test]
    async fn test_write_leads_csv() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let leads = vec![lead(json!({"address": "9 Pine Ct", "category": "foreclosure"}))];

        let path = write_leads_csv(dir.path(), run_id, &leads)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, path_in(dir.path(), run_id));
        let lines = parse(&std::fs::read(path).unwrap());
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("9 Pine Ct"));
    }
}
