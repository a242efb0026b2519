//! Result sinks.
//!
//! Accepted leads are persisted through the [`Sink`] trait. Exactly one sink
//! is the primary; it also seeds the duplicate index at run start and holds
//! quarantined records. The [`SinkDispatcher`] fans every lead out to all
//! sinks and applies the configured durability policy.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────┐
//!    LeadRecord ───────►│  SinkDispatcher  │
//!                       └────────┬─────────┘
//!                 retry+timeout  │  per sink, concurrently
//!             ┌──────────────────┼──────────────────┐
//!             ▼                  ▼                  ▼
//!      ┌────────────┐     ┌────────────┐     ┌────────────┐
//!      │  primary   │     │ secondary  │     │ secondary  │
//!      │ (+ quarant)│     │            │     │            │
//!      └────────────┘     └────────────┘     └────────────┘
//! ```

pub mod dispatcher;
pub mod jsonl;
pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::SinkError;
use crate::records::{LeadRecord, RawRecord};
use crate::validation::ValidationVerdict;

pub use dispatcher::{PersistAck, SinkDispatcher};
pub use jsonl::JsonlSink;
pub use memory::MemorySink;
pub use sqlite::SqliteSink;
pub use webhook::WebhookSink;

/// What a sink did with a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    /// The lead was newly written.
    Stored,
    /// A lead with the same id was already present; nothing changed.
    AlreadyPresent,
}

impl WriteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteStatus::Stored => "stored",
            WriteStatus::AlreadyPresent => "duplicate",
        }
    }
}

/// Destination for accepted leads. Writes must be idempotent by lead id.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, lead: &LeadRecord) -> Result<WriteStatus, SinkError>;

    /// Canonical identifiers and lead ids already held, for duplicate
    /// detection across runs.
    async fn load_identifiers(&self) -> Result<Vec<(String, Uuid)>, SinkError> {
        Ok(Vec::new())
    }

    /// Durable quarantine storage, if this sink provides one.
    fn quarantine_store(&self) -> Option<&dyn QuarantineStore> {
        None
    }
}

/// A record held back by validation, with the verdict that held it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub run_id: Uuid,
    pub record: RawRecord,
    pub verdict: ValidationVerdict,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantineEntry {
    pub fn new(run_id: Uuid, record: RawRecord, verdict: ValidationVerdict) -> Self {
        Self {
            run_id,
            record,
            verdict,
            quarantined_at: Utc::now(),
        }
    }
}

/// Durable store for quarantined records. Idempotent by verdict id.
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    async fn quarantine(&self, entry: &QuarantineEntry) -> Result<(), SinkError>;

    async fn quarantined(&self) -> Result<Vec<QuarantineEntry>, SinkError>;
}

/// Role of a configured sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkRole {
    Primary,
    #[default]
    Secondary,
}

/// Durability policy applied by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkPolicy {
    /// The primary must succeed; secondary failures are degraded.
    #[default]
    RequirePrimary,
    /// At least one sink must succeed; any failure is degraded.
    RequireAny,
}

impl fmt::Display for SinkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkPolicy::RequirePrimary => write!(f, "require_primary"),
            SinkPolicy::RequireAny => write!(f, "require_any"),
        }
    }
}

impl std::str::FromStr for SinkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "require_primary" => Ok(SinkPolicy::RequirePrimary),
            "require_any" => Ok(SinkPolicy::RequireAny),
            other => Err(format!(
                "unknown sink policy '{}', expected require_primary or require_any",
                other
            )),
        }
    }
}
