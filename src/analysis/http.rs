//! Scoring service client.

use async_trait::async_trait;
use reqwest::Client;

use super::{Analyzer, EnrichmentSignals};
use crate::acquisition::http::is_transient_status;
use crate::error::CapabilityError;
use crate::records::LeadRecord;

/// Posts each lead to a scoring endpoint and reads back
/// `{"predictive_score": 0-100, "signals": {...}}`.
#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
    client: Client,
    endpoint: String,
}

impl HttpAnalyzer {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &str {
        "http-analyzer"
    }

    async fn analyze(&self, lead: &LeadRecord) -> Result<EnrichmentSignals, CapabilityError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(lead)
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

        let signals: EnrichmentSignals = response
            .json()
            .await
            .map_err(|e| CapabilityError::invalid_response(self.name(), e.to_string()))?;

        if !(0.0..=100.0).contains(&signals.predictive_score) {
            return Err(CapabilityError::invalid_response(
                self.name(),
                format!("predictive_score {} outside [0, 100]", signals.predictive_score),
            ));
        }
        Ok(signals)
    }
}
