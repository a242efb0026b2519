//! Webhook sink: posts each lead to an HTTP endpoint.
//!
//! The lead id is sent as an `Idempotency-Key` header; the receiver is
//! expected to answer 409 for an id it already holds.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{Sink, WriteStatus};
use crate::error::SinkError;
use crate::records::LeadRecord;

#[derive(Debug, Clone)]
pub struct WebhookSink {
    name: String,
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, client: Client, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, lead: &LeadRecord) -> Result<WriteStatus, SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", lead.id.to_string())
            .json(lead)
            .send()
            .await
            .map_err(|e| SinkError::write_failed(&self.name, e.to_string()))?;

        match response.status() {
            StatusCode::CONFLICT => Ok(WriteStatus::AlreadyPresent),
            status if status.is_success() => Ok(WriteStatus::Stored),
            status => Err(SinkError::write_failed(
                &self.name,
                format!("HTTP {}", status.as_u16()),
            )),
        }
    }
}
