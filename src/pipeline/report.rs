//! Run report written at the end of every run that reaches `REPORTING`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use super::progress::CounterSnapshot;
use super::run::RunSummary;
use crate::analysis::Priority;
use crate::records::LeadRecord;

/// Number of leads listed in [`RunReport::top_leads`].
pub const TOP_LEADS: usize = 10;

/// Label for leads stored without analysis output.
const UNSCORED: &str = "UNSCORED";

/// One of the highest scoring leads of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLead {
    pub id: Uuid,
    pub address: String,
    pub category: String,
    pub predictive_score: f64,
    pub confidence: f64,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub counters: CounterSnapshot,
    /// Stored leads per priority label.
    pub priority_breakdown: BTreeMap<String, usize>,
    pub top_leads: Vec<TopLead>,
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Builds the report from the run summary and the leads stored by the run.
    pub fn build(summary: &RunSummary, stored: &[LeadRecord]) -> Self {
        let mut priority_breakdown: BTreeMap<String, usize> = Priority::all()
            .iter()
            .map(|p| (p.as_str().to_string(), 0))
            .collect();
        for lead in stored {
            let label = lead.priority().unwrap_or(UNSCORED).to_string();
            *priority_breakdown.entry(label).or_insert(0) += 1;
        }

        let mut scored: Vec<&LeadRecord> = stored
            .iter()
            .filter(|l| l.predictive_score.is_some())
            .collect();
        scored.sort_by(|a, b| {
            let sa = a.predictive_score.unwrap_or_default();
            let sb = b.predictive_score.unwrap_or_default();
            sb.total_cmp(&sa).then_with(|| a.identifier.cmp(&b.identifier))
        });

        let top_leads = scored
            .into_iter()
            .take(TOP_LEADS)
            .map(|lead| TopLead {
                id: lead.id,
                address: lead.address.clone(),
                category: lead.category.clone(),
                predictive_score: lead.predictive_score.unwrap_or_default(),
                confidence: lead.confidence,
                priority: lead.priority().map(str::to_string),
            })
            .collect();

        Self {
            run_id: summary.run_id,
            started_at: summary.started_at,
            generated_at: Utc::now(),
            counters: summary.counters,
            priority_breakdown,
            top_leads,
            warnings: summary.warnings.clone(),
        }
    }

    /// Path of the report inside `reports_dir`.
    pub fn path_in(&self, reports_dir: &Path) -> PathBuf {
        reports_dir.join(format!("report_{}.json", self.run_id))
    }

    /// Writes the report as pretty JSON, creating the directory if needed.
    pub async fn write(&self, reports_dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(reports_dir).await?;
        let path = self.path_in(reports_dir);
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        info!(run_id = %self.run_id, path = %path.display(), "Run report written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::EnrichmentSignals;
    use crate::pipeline::run::PipelineRun;
    use crate::records::RawRecord;
    use crate::routing::Venue;
    use crate::validation::{Decision, Stage, StageResult, ValidationVerdict};
    use serde_json::{json, Value};

    fn lead(address: &str, score: Option<f64>) -> LeadRecord {
        let Value::Object(map) = json!({"address": address, "category": "probate"}) else {
            unreachable!()
        };
        let record = RawRecord::new("county", Uuid::new_v4(), Venue::Local, map);
        let verdict = ValidationVerdict::new(
            record.id,
            1,
            vec![StageResult::pass(Stage::Schema, 1.0)],
            0.9,
            Decision::Accepted,
            false,
        );
        let lead = LeadRecord::from_accepted(&record, &verdict).unwrap();
        match score {
            Some(s) => lead.with_enrichment(
                EnrichmentSignals::new(s)
                    .with_signal("priority", Priority::classify(s, 0.9).as_str()),
            ),
            None => lead,
        }
    }

    #[test]
    fn test_breakdown_and_top_leads() {
        let mut leads: Vec<LeadRecord> = (0..12)
            .map(|i| lead(&format!("{} Main St", i + 1), Some(40.0 + i as f64 * 5.0)))
            .collect();
        leads.push(lead("99 Side Rd", None));

        let summary = PipelineRun::new(Uuid::new_v4()).summary();
        let report = RunReport::build(&summary, &leads);

        assert_eq!(report.top_leads.len(), TOP_LEADS);
        assert_eq!(report.top_leads[0].predictive_score, 95.0);
        assert!(report
            .top_leads
            .windows(2)
            .all(|w| w[0].predictive_score >= w[1].predictive_score));
        assert_eq!(report.priority_breakdown[UNSCORED], 1);
        assert_eq!(report.priority_breakdown.values().sum::<usize>(), 13);
        assert_eq!(report.priority_breakdown["CRITICAL"], 4);
    }

    #[tokio::test]
    async fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let summary = PipelineRun::new(Uuid::new_v4()).summary();
        let report = RunReport::build(&summary, &[]);
        let reports_dir = dir.path().join("reports");

        let path = report.write(&reports_dir).await.unwrap();
        assert!(path.ends_with(format!("report_{}.json", summary.run_id)));
        let parsed: RunReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.run_id, summary.run_id);
        assert_eq!(parsed.priority_breakdown["LOW"], 0);
    }
}
