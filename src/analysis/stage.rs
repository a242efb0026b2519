//! Bounded-parallel analysis of accepted leads.

use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Analyzer;
use crate::error::CapabilityError;
use crate::metrics::MetricsCollector;
use crate::records::LeadRecord;
use crate::scheduler::{CancelSignal, RetryPolicy};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("All {attempted} analyses failed, last error: {last_error}")]
    AllFailed {
        attempted: usize,
        last_error: CapabilityError,
    },
}

/// Result of analysing a batch.
///
/// Leads whose analysis failed are kept without enrichment so they can still
/// be stored.
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub leads: Vec<LeadRecord>,
    pub analyzed: usize,
    pub failures: Vec<(Uuid, CapabilityError)>,
}

#[derive(Clone)]
pub struct AnalysisStage {
    analyzer: Arc<dyn Analyzer>,
    retry: RetryPolicy,
    timeout: Duration,
    max_parallel: usize,
    metrics: MetricsCollector,
    cancel: CancelSignal,
}

impl AnalysisStage {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        retry: RetryPolicy,
        timeout: Duration,
        max_parallel: usize,
    ) -> Self {
        Self {
            analyzer,
            retry,
            timeout,
            max_parallel: max_parallel.max(1),
            metrics: MetricsCollector::new(),
            cancel: CancelSignal::new(),
        }
    }

    /// Stops pulling new leads once `cancel` is raised. Leads already in
    /// flight still finish.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Enriches every lead. Fails only when the batch is non-empty and no
    /// analysis succeeded.
    pub async fn run(&self, leads: Vec<LeadRecord>) -> Result<AnalysisOutcome, AnalysisError> {
        let attempted = leads.len();
        let results: Vec<(LeadRecord, Result<_, CapabilityError>)> = stream::iter(leads)
            .take_while(|_| future::ready(!self.cancel.is_cancelled()))
            .map(|lead| async move {
                let result = self.analyze_one(&lead).await;
                (lead, result)
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        let mut outcome = AnalysisOutcome::default();
        for (lead, result) in results {
            match result {
                Ok(signals) => {
                    self.metrics.record_analysis(true);
                    outcome.analyzed += 1;
                    outcome.leads.push(lead.with_enrichment(signals));
                }
                Err(e) => {
                    self.metrics.record_analysis(false);
                    warn!(lead_id = %lead.id, error = %e, "Analysis failed, keeping lead unenriched");
                    outcome.failures.push((lead.id, e));
                    outcome.leads.push(lead);
                }
            }
        }

        if attempted > 0 && outcome.analyzed == 0 {
            if let Some((_, last_error)) = outcome.failures.pop() {
                return Err(AnalysisError::AllFailed {
                    attempted,
                    last_error,
                });
            }
        }
        Ok(outcome)
    }

    async fn analyze_one(
        &self,
        lead: &LeadRecord,
    ) -> Result<super::EnrichmentSignals, CapabilityError> {
        let name = self.analyzer.name().to_string();
        self.retry
            .retry(
                |attempt| {
                    let name = name.clone();
                    async move {
                        debug!(lead_id = %lead.id, analyzer = %name, attempt, "Analysing lead");
                        match tokio::time::timeout(self.timeout, self.analyzer.analyze(lead)).await {
                            Ok(result) => result,
                            Err(_) => Err(CapabilityError::Timeout {
                                capability: name,
                                timeout: self.timeout,
                            }),
                        }
                    }
                },
                CapabilityError::is_retryable,
            )
            .await
            .map_err(|exhausted| exhausted.last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{EnrichmentSignals, RuleBasedAnalyzer};
    use crate::records::RawRecord;
    use crate::routing::Venue;
    use crate::validation::{Decision, Stage, StageResult, ValidationVerdict};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lead(address: &str) -> LeadRecord {
        let Value::Object(map) = json!({"address": address, "category": "auction"}) else {
            unreachable!()
        };
        let record = RawRecord::new("county", Uuid::new_v4(), Venue::Cloud, map);
        let verdict = ValidationVerdict::new(
            record.id,
            1,
            vec![StageResult::pass(Stage::Schema, 1.0)],
            0.9,
            Decision::Accepted,
            false,
        );
        LeadRecord::from_accepted(&record, &verdict).unwrap()
    }

    struct FlakyAnalyzer {
        calls: AtomicUsize,
        fail_all: bool,
    }

    #[async_trait]
    impl Analyzer for FlakyAnalyzer {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn analyze(&self, _lead: &LeadRecord) -> Result<EnrichmentSignals, CapabilityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_all || call % 2 == 0 {
                Err(CapabilityError::unavailable("flaky", "502"))
            } else {
                Ok(EnrichmentSignals::new(60.0))
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(1, Duration::ZERO).with_jitter(false)
    }

    #[tokio::test]
    async fn test_rule_based_batch() {
        let stage = AnalysisStage::new(
            Arc::new(RuleBasedAnalyzer::new()),
            policy(),
            Duration::from_secs(1),
            4,
        );
        let outcome = stage
            .run(vec![lead("1 Main St"), lead("2 Main St"), lead("3 Main St")])
            .await
            .unwrap();
        assert_eq!(outcome.analyzed, 3);
        assert!(outcome.leads.iter().all(|l| l.predictive_score == Some(70.0)));
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let analyzer = Arc::new(FlakyAnalyzer {
            calls: AtomicUsize::new(0),
            fail_all: false,
        });
        let stage = AnalysisStage::new(analyzer.clone(), policy(), Duration::from_secs(1), 1);
        let outcome = stage.run(vec![lead("1 Main St")]).await.unwrap();
        assert_eq!(outcome.analyzed, 1);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_failed_is_error() {
        let analyzer = Arc::new(FlakyAnalyzer {
            calls: AtomicUsize::new(0),
            fail_all: true,
        });
        let stage = AnalysisStage::new(analyzer, policy(), Duration::from_secs(1), 2);
        let err = stage
            .run(vec![lead("1 Main St"), lead("2 Main St")])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::AllFailed { attempted: 2, .. }));
    }

    struct CountingAnalyzer {
        calls: AtomicUsize,
        cancel: CancelSignal,
    }

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
        fn name(&self) -> &str {
            "counting"
        }

        async fn analyze(&self, _lead: &LeadRecord) -> Result<EnrichmentSignals, CapabilityError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                self.cancel.cancel();
            }
            Ok(EnrichmentSignals::new(40.0))
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_pulling_leads() {
        let cancel = CancelSignal::new();
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            cancel: cancel.clone(),
        });
        let stage = AnalysisStage::new(analyzer.clone(), policy(), Duration::from_secs(1), 1)
            .with_cancel(cancel);
        let leads = (0..10).map(|i| lead(&format!("{i} Main St"))).collect();
        let outcome = stage.run(leads).await.unwrap();

        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.analyzed, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_ok() {
        let stage = AnalysisStage::new(
            Arc::new(RuleBasedAnalyzer::new()),
            policy(),
            Duration::from_secs(1),
            2,
        );
        let outcome = stage.run(Vec::new()).await.unwrap();
        assert_eq!(outcome.analyzed, 0);
    }
}
