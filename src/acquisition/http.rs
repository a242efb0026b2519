//! HTTP acquirers.
//!
//! The local venue fetches the locator directly. The cloud venue relays the
//! task to a remote scraping service that performs the fetch on our behalf.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::Acquirer;
use crate::error::AcquisitionError;
use crate::records::Payload;
use crate::scheduler::Task;

/// Whether an HTTP status is worth retrying.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Builds the shared client used by the HTTP capabilities.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("lead-sniper/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn classify_request_error(err: reqwest::Error) -> AcquisitionError {
    if err.is_decode() {
        AcquisitionError::Rejected(format!("undecodable response: {}", err))
    } else {
        // Connect, timeout and body errors are all network-level.
        AcquisitionError::Transient(err.to_string())
    }
}

fn into_payload(body: Value) -> Result<Payload, AcquisitionError> {
    match body {
        Value::Object(map) => Ok(map),
        // Listing endpoints commonly wrap a single record.
        Value::Array(mut items) if items.len() == 1 => match items.remove(0) {
            Value::Object(map) => Ok(map),
            other => Err(AcquisitionError::Rejected(format!(
                "expected a JSON object, got {}",
                kind(&other)
            ))),
        },
        other => Err(AcquisitionError::Rejected(format!(
            "expected a JSON object, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Acquires over HTTP, either directly or through a relay service.
#[derive(Debug, Clone)]
pub struct HttpAcquirer {
    name: String,
    client: Client,
    relay_url: Option<String>,
}

impl HttpAcquirer {
    /// Fetches each task's locator directly.
    pub fn direct(client: Client) -> Self {
        Self {
            name: "local-http".to_string(),
            client,
            relay_url: None,
        }
    }

    /// Posts each task to `{base_url}/acquire`.
    pub fn relay(client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            name: "cloud-relay".to_string(),
            client,
            relay_url: Some(format!("{}/acquire", base_url.trim_end_matches('/'))),
        }
    }

    async fn send(&self, task: &Task) -> Result<reqwest::Response, reqwest::Error> {
        match &self.relay_url {
            Some(url) => {
                self.client
                    .post(url)
                    .json(&json!({
                        "task_id": task.id,
                        "source_id": task.source_id,
                        "locator": task.locator,
                        "category_hint": task.category_hint,
                    }))
                    .send()
                    .await
            }
            None => self.client.get(&task.locator).send().await,
        }
    }
}

#[async_trait]
impl Acquirer for HttpAcquirer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, task: &Task) -> Result<Payload, AcquisitionError> {
        let response = self.send(task).await.map_err(classify_request_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200));
            return Err(if is_transient_status(status) {
                AcquisitionError::Transient(message)
            } else {
                AcquisitionError::Rejected(message)
            });
        }

        let body: Value = response.json().await.map_err(classify_request_error)?;
        into_payload(body)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Stand-in for a venue with no endpoint configured.
///
/// Fails transiently so tasks routed here are retried and the router steers
/// them back once the other venue recovers.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredAcquirer;

#[async_trait]
impl Acquirer for UnconfiguredAcquirer {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn acquire(&self, _task: &Task) -> Result<Payload, AcquisitionError> {
        Err(AcquisitionError::Transient(
            "venue has no endpoint configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_into_payload() {
        assert!(into_payload(json!({"address": "1 Main St"})).is_ok());
        assert!(into_payload(json!([{"address": "1 Main St"}])).is_ok());
        assert!(matches!(
            into_payload(json!([1, 2])),
            Err(AcquisitionError::Rejected(_))
        ));
        assert!(matches!(
            into_payload(json!("text")),
            Err(AcquisitionError::Rejected(_))
        ));
    }

    #[test]
    fn test_relay_url_normalized() {
        let client = build_client(Duration::from_secs(1)).unwrap();
        let acquirer = HttpAcquirer::relay(client, "https://relay.example/");
        assert_eq!(
            acquirer.relay_url.as_deref(),
            Some("https://relay.example/acquire")
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[tokio::test]
    async fn test_unconfigured_is_transient() {
        let err = UnconfiguredAcquirer
            .acquire(&Task::new("s", "l"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
