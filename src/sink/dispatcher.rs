//! Fan-out of accepted leads to every configured sink.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{QuarantineEntry, Sink, SinkPolicy, WriteStatus};
use crate::error::SinkError;
use crate::metrics::MetricsCollector;
use crate::records::LeadRecord;
use crate::scheduler::RetryPolicy;

/// Acknowledgement of a persisted lead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistAck {
    pub lead_id: Uuid,
    /// `AlreadyPresent` when the deciding sink already held the lead.
    pub status: WriteStatus,
    /// Sinks that accepted the write.
    pub written: Vec<String>,
    /// Sinks that failed after their retry budget, with the last error.
    pub degraded: Vec<(String, String)>,
}

impl PersistAck {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

struct SinkAttempt {
    name: String,
    primary: bool,
    result: Result<WriteStatus, (u32, SinkError)>,
}

/// Writes each lead to one primary and any number of secondary sinks.
#[derive(Clone)]
pub struct SinkDispatcher {
    primary: Arc<dyn Sink>,
    secondaries: Vec<Arc<dyn Sink>>,
    policy: SinkPolicy,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: MetricsCollector,
}

impl SinkDispatcher {
    pub fn new(
        primary: Arc<dyn Sink>,
        secondaries: Vec<Arc<dyn Sink>>,
        policy: SinkPolicy,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondaries,
            policy,
            retry,
            timeout,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn policy(&self) -> SinkPolicy {
        self.policy
    }

    pub fn primary(&self) -> &Arc<dyn Sink> {
        &self.primary
    }

    /// Identifiers held by the primary, used to seed duplicate detection.
    pub async fn load_identifiers(&self) -> Result<Vec<(String, Uuid)>, SinkError> {
        match tokio::time::timeout(self.timeout, self.primary.load_identifiers()).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                sink: self.primary.name().to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Records a quarantined entry in the primary's quarantine store.
    ///
    /// Returns `false` when the primary has no quarantine store.
    pub async fn quarantine(&self, entry: &QuarantineEntry) -> Result<bool, SinkError> {
        let Some(store) = self.primary.quarantine_store() else {
            warn!(
                sink = self.primary.name(),
                record_id = %entry.record.id,
                "Primary sink has no quarantine store, quarantined record kept in memory only"
            );
            return Ok(false);
        };
        let name = self.primary.name().to_string();
        self.retry
            .retry(
                |_| {
                    let name = name.clone();
                    async move {
                        match tokio::time::timeout(self.timeout, store.quarantine(entry)).await {
                            Ok(result) => result,
                            Err(_) => Err(SinkError::Timeout {
                                sink: name,
                                timeout: self.timeout,
                            }),
                        }
                    }
                },
                is_retryable,
            )
            .await
            .map(|_| true)
            .map_err(|exhausted| exhausted.last_error)
    }

    /// Writes a lead to every sink concurrently and applies the durability
    /// policy.
    pub async fn persist(&self, lead: &LeadRecord) -> Result<PersistAck, SinkError> {
        let writes = std::iter::once((&self.primary, true))
            .chain(self.secondaries.iter().map(|s| (s, false)))
            .map(|(sink, primary)| self.write_one(sink, primary, lead));
        let attempts = join_all(writes).await;

        let mut written = Vec::new();
        let mut degraded = Vec::new();
        let mut status = None;
        let mut primary_failure = None;

        for attempt in attempts {
            match attempt.result {
                Ok(s) => {
                    self.metrics.record_sink_write(&attempt.name, s.as_str());
                    if attempt.primary || status.is_none() {
                        status = Some(s);
                    }
                    written.push(attempt.name);
                }
                Err((attempts, err)) => {
                    let label = if matches!(err, SinkError::Timeout { .. }) {
                        "timeout"
                    } else {
                        "failed"
                    };
                    self.metrics.record_sink_write(&attempt.name, label);
                    if attempt.primary {
                        primary_failure = Some((attempt.name.clone(), attempts, err.to_string()));
                    }
                    degraded.push((attempt.name, err.to_string()));
                }
            }
        }

        if let Some((sink, attempts, message)) = primary_failure {
            if self.policy == SinkPolicy::RequirePrimary {
                return Err(SinkError::PrimaryExhausted {
                    sink,
                    attempts,
                    message,
                });
            }
        }

        let Some(status) = status else {
            let summary = degraded
                .iter()
                .map(|(sink, err)| format!("{}: {}", sink, err))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SinkError::AllSinksFailed(summary));
        };

        if !degraded.is_empty() {
            warn!(
                lead_id = %lead.id,
                degraded = ?degraded.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
                "Lead persisted with degraded sinks"
            );
        }

        Ok(PersistAck {
            lead_id: lead.id,
            status,
            written,
            degraded,
        })
    }

    async fn write_one(&self, sink: &Arc<dyn Sink>, primary: bool, lead: &LeadRecord) -> SinkAttempt {
        let name = sink.name().to_string();
        let result = self
            .retry
            .retry(
                |attempt| {
                    let name = name.clone();
                    async move {
                        debug!(sink = %name, lead_id = %lead.id, attempt, "Writing lead");
                        match tokio::time::timeout(self.timeout, sink.write(lead)).await {
                            Ok(result) => result,
                            Err(_) => Err(SinkError::Timeout {
                                sink: name,
                                timeout: self.timeout,
                            }),
                        }
                    }
                },
                is_retryable,
            )
            .await
            .map_err(|exhausted| (exhausted.attempts, exhausted.last_error));

        SinkAttempt {
            name,
            primary,
            result,
        }
    }
}

fn is_retryable(err: &SinkError) -> bool {
    matches!(err, SinkError::WriteFailed { .. } | SinkError::Timeout { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RawRecord;
    use crate::routing::Venue;
    use crate::sink::MemorySink;
    use crate::validation::{Decision, Stage, StageResult, ValidationVerdict};
    use serde_json::{json, Value};

    fn lead() -> LeadRecord {
        let Value::Object(map) = json!({"address": "9 Elm Dr", "category": "auction"}) else {
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
        LeadRecord::from_accepted(&record, &verdict).unwrap()
    }

    fn dispatcher(
        primary: Arc<MemorySink>,
        secondary: Arc<MemorySink>,
        policy: SinkPolicy,
    ) -> SinkDispatcher {
        SinkDispatcher::new(
            primary,
            vec![secondary as Arc<dyn Sink>],
            policy,
            RetryPolicy::new(2, Duration::ZERO).with_jitter(false),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_persist_twice_stores_once() {
        let primary = Arc::new(MemorySink::new("primary"));
        let secondary = Arc::new(MemorySink::new("secondary"));
        let d = dispatcher(primary.clone(), secondary.clone(), SinkPolicy::RequirePrimary);
        let l = lead();

        let first = d.persist(&l).await.unwrap();
        let second = d.persist(&l).await.unwrap();
        assert_eq!(first.status, WriteStatus::Stored);
        assert_eq!(second.status, WriteStatus::AlreadyPresent);
        assert_eq!(primary.len(), 1);
        assert_eq!(secondary.len(), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_fatal_under_require_primary() {
        let primary = Arc::new(MemorySink::new("primary"));
        primary.set_failing(true);
        let secondary = Arc::new(MemorySink::new("secondary"));
        let d = dispatcher(primary.clone(), secondary, SinkPolicy::RequirePrimary);

        let err = d.persist(&lead()).await.unwrap_err();
        assert!(matches!(err, SinkError::PrimaryExhausted { attempts: 3, .. }));
        assert!(err.is_run_fatal());
        assert_eq!(primary.attempts(), 3);
    }

    #[tokio::test]
    async fn test_primary_failure_degraded_under_require_any() {
        let primary = Arc::new(MemorySink::new("primary"));
        primary.set_failing(true);
        let secondary = Arc::new(MemorySink::new("secondary"));
        let d = dispatcher(primary, secondary.clone(), SinkPolicy::RequireAny);

        let ack = d.persist(&lead()).await.unwrap();
        assert_eq!(ack.status, WriteStatus::Stored);
        assert_eq!(ack.written, vec!["secondary".to_string()]);
        assert_eq!(ack.degraded.len(), 1);
        assert_eq!(ack.degraded[0].0, "primary");
        assert_eq!(secondary.len(), 1);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let primary = Arc::new(MemorySink::new("primary"));
        primary.set_failing(true);
        let secondary = Arc::new(MemorySink::new("secondary"));
        secondary.set_failing(true);
        let d = dispatcher(primary, secondary, SinkPolicy::RequireAny);

        let err = d.persist(&lead()).await.unwrap_err();
        assert!(matches!(err, SinkError::AllSinksFailed(_)));
    }

    #[tokio::test]
    async fn test_secondary_failure_is_degraded() {
        let primary = Arc::new(MemorySink::new("primary"));
        let secondary = Arc::new(MemorySink::new("secondary"));
        secondary.set_failing(true);
        let d = dispatcher(primary.clone(), secondary, SinkPolicy::RequirePrimary);

        let ack = d.persist(&lead()).await.unwrap();
        assert!(ack.is_degraded());
        assert_eq!(primary.len(), 1);
    }
}
