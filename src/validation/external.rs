//! External verification stage.
//!
//! Address/identity verification is an external capability consumed through
//! the [`Verifier`] trait. The stage wraps each call in a deadline and its own
//! retry budget, and keeps "the service said no" apart from "the service
//! could not be reached": only the former rejects a record.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::verdict::{Stage, StageResult};
use crate::acquisition::http::is_transient_status;
use crate::error::CapabilityError;
use crate::records::RawRecord;
use crate::scheduler::RetryPolicy;

/// Answer from a verifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Verification {
    /// The record checks out, with the verifier's confidence in [0, 1].
    Confirmed { score: f64 },
    /// The verifier definitively refuted the record.
    Refuted { reason: String },
    /// The verifier answered but could not decide.
    Inconclusive { reason: String },
}

/// External verification capability.
#[async_trait]
pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(&self, record: &RawRecord) -> Result<Verification, CapabilityError>;
}

/// Outcome of the external stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalOutcome {
    pub result: StageResult,
    /// The verifier could not decide; the record should be quarantined.
    pub inconclusive: bool,
    /// Inconclusive only because the verifier was unreachable.
    pub retryable: bool,
}

/// Runs a [`Verifier`] with a deadline and retry budget.
#[derive(Clone)]
pub struct ExternalCheck {
    verifier: Arc<dyn Verifier>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ExternalCheck {
    pub fn new(verifier: Arc<dyn Verifier>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            verifier,
            retry,
            timeout,
        }
    }

    pub async fn check(&self, record: &RawRecord) -> ExternalOutcome {
        let name = self.verifier.name().to_string();
        let result = self
            .retry
            .retry(
                |attempt| {
                    let verifier = Arc::clone(&self.verifier);
                    let name = name.clone();
                    async move {
                        debug!(record_id = %record.id, verifier = %name, attempt, "Verifying record");
                        match tokio::time::timeout(self.timeout, verifier.verify(record)).await {
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
            .await;

        match result {
            Ok(Verification::Confirmed { score }) => ExternalOutcome {
                result: StageResult::pass(Stage::External, score),
                inconclusive: false,
                retryable: false,
            },
            Ok(Verification::Refuted { reason }) => ExternalOutcome {
                result: StageResult::fail(Stage::External, format!("refuted: {}", reason)),
                inconclusive: false,
                retryable: false,
            },
            Ok(Verification::Inconclusive { reason }) => ExternalOutcome {
                result: StageResult::fail(Stage::External, format!("inconclusive: {}", reason)),
                inconclusive: true,
                retryable: false,
            },
            Err(exhausted) => {
                warn!(
                    record_id = %record.id,
                    verifier = %name,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "External verification unavailable"
                );
                ExternalOutcome {
                    result: StageResult::fail(
                        Stage::External,
                        format!(
                            "verification unavailable after {} attempts: {}",
                            exhausted.attempts, exhausted.last_error
                        ),
                    ),
                    inconclusive: true,
                    retryable: exhausted.last_error.is_retryable(),
                }
            }
        }
    }
}

/// Verifies records against an HTTP verification service.
///
/// Posts `{record_id, address, category, fields}` to the endpoint and expects
/// `{"status": "confirmed", "score": 0.9}`, `{"status": "refuted", "reason":
/// ...}` or `{"status": "inconclusive", "reason": ...}`.
#[derive(Debug, Clone)]
pub struct HttpVerifier {
    client: Client,
    endpoint: String,
}

impl HttpVerifier {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    fn name(&self) -> &str {
        "http-verifier"
    }

    async fn verify(&self, record: &RawRecord) -> Result<Verification, CapabilityError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "record_id": record.id,
                "address": record.text("address"),
                "category": record.text("category"),
                "fields": record.payload,
            }))
            .send()
            .await
            .map_err(|e| CapabilityError::unavailable(self.name(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {}", status.as_u16());
            return Err(if is_transient_status(status) {
                CapabilityError::unavailable(self.name(), message)
            } else {
                CapabilityError::invalid_response(self.name(), message)
            });
        }

        response
            .json::<Verification>()
            .await
            .map_err(|e| CapabilityError::invalid_response(self.name(), e.to_string()))
    }
}

/// Verifier used when no verification service is configured.
///
/// Confirms every record with a fixed score, leaving the decision to the
/// schema and cross-reference stages.
#[derive(Debug, Clone)]
pub struct StaticVerifier {
    score: f64,
}

impl StaticVerifier {
    pub fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl Verifier for StaticVerifier {
    fn name(&self) -> &str {
        "static-verifier"
    }

    async fn verify(&self, _record: &RawRecord) -> Result<Verification, CapabilityError> {
        Ok(Verification::Confirmed { score: self.score })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Venue;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct ScriptedVerifier {
        failures_before_answer: u32,
        answer: Verification,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn verify(&self, _record: &RawRecord) -> Result<Verification, CapabilityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_answer {
                Err(CapabilityError::unavailable("scripted", "503"))
            } else {
                Ok(self.answer.clone())
            }
        }
    }

    fn record() -> RawRecord {
        RawRecord::new("s", Uuid::new_v4(), Venue::Local, serde_json::Map::new())
    }

    fn check(failures: u32, answer: Verification) -> (ExternalCheck, Arc<ScriptedVerifier>) {
        let verifier = Arc::new(ScriptedVerifier {
            failures_before_answer: failures,
            answer,
            calls: AtomicU32::new(0),
        });
        let check = ExternalCheck::new(
            verifier.clone(),
            RetryPolicy::new(2, Duration::ZERO).with_jitter(false),
            Duration::from_secs(1),
        );
        (check, verifier)
    }

    #[tokio::test]
    async fn test_confirmed_after_transient_failure() {
        let (check, verifier) = check(1, Verification::Confirmed { score: 0.9 });
        let outcome = check.check(&record()).await;
        assert!(outcome.result.passed);
        assert!((outcome.result.score - 0.9).abs() < 1e-9);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refuted_is_not_inconclusive() {
        let (check, _) = check(
            0,
            Verification::Refuted {
                reason: "no such parcel".into(),
            },
        );
        let outcome = check.check(&record()).await;
        assert!(!outcome.result.passed);
        assert!(!outcome.inconclusive);
    }

    #[tokio::test]
    async fn test_unreachable_is_retryable_inconclusive() {
        let (check, verifier) = check(10, Verification::Confirmed { score: 1.0 });
        let outcome = check.check(&record()).await;
        assert!(outcome.inconclusive);
        assert!(outcome.retryable);
        assert_eq!(outcome.result.score, 0.0);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_inconclusive_answer_not_retryable() {
        let (check, _) = check(
            0,
            Verification::Inconclusive {
                reason: "ambiguous match".into(),
            },
        );
        let outcome = check.check(&record()).await;
        assert!(outcome.inconclusive);
        assert!(!outcome.retryable);
    }

    #[test]
    fn test_verification_deserialize() {
        let v: Verification = serde_json::from_str(r#"{"status":"confirmed","score":0.8}"#).unwrap();
        assert_eq!(v, Verification::Confirmed { score: 0.8 });
        let v: Verification =
            serde_json::from_str(r#"{"status":"refuted","reason":"vacant lot"}"#).unwrap();
        assert!(matches!(v, Verification::Refuted { .. }));
    }
}
