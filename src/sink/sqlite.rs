//! SQLite sink for stored leads and quarantined records.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::migrations::{self, MigrationError};
use super::{QuarantineEntry, QuarantineStore, Sink, WriteStatus};
use crate::error::SinkError;
use crate::records::LeadRecord;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

#[derive(Debug, Clone)]
pub struct SqliteSink {
    name: String,
    pool: SqlitePool,
}

impl SqliteSink {
    /// Opens (creating if needed) the database at `database_url` and applies
    /// migrations.
    pub async fn connect(name: impl Into<String>, database_url: &str) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        migrations::migrate(&pool).await?;

        Ok(Self {
            name: name.into(),
            pool,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_lead(&self, lead: &LeadRecord) -> Result<WriteStatus, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO leads (
                id, identifier, address, category, source_id, acquired_at,
                confidence, predictive_score, priority, enrichment, fields,
                verdict_id, record_id, stored_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(lead.id.to_string())
        .bind(&lead.identifier)
        .bind(&lead.address)
        .bind(&lead.category)
        .bind(&lead.source_id)
        .bind(lead.acquired_at.to_rfc3339())
        .bind(lead.confidence)
        .bind(lead.predictive_score)
        .bind(lead.priority())
        .bind(serde_json::to_string(&lead.enrichment)?)
        .bind(serde_json::to_string(&lead.fields)?)
        .bind(lead.verdict_id.to_string())
        .bind(lead.record_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            WriteStatus::AlreadyPresent
        } else {
            WriteStatus::Stored
        })
    }

    async fn select_identifiers(&self) -> Result<Vec<(String, Uuid)>, DatabaseError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT identifier, id FROM leads")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(identifier, id)| Uuid::parse_str(&id).ok().map(|id| (identifier, id)))
            .collect())
    }

    async fn insert_quarantine(&self, entry: &QuarantineEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO quarantine (verdict_id, run_id, record_id, retryable, entry, quarantined_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (verdict_id) DO NOTHING
            "#,
        )
        .bind(entry.verdict.id.to_string())
        .bind(entry.run_id.to_string())
        .bind(entry.record.id.to_string())
        .bind(entry.verdict.retryable)
        .bind(serde_json::to_string(entry)?)
        .bind(entry.quarantined_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn select_quarantine(&self) -> Result<Vec<QuarantineEntry>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT entry FROM quarantine ORDER BY quarantined_at")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(entry,)| serde_json::from_str(&entry).map_err(DatabaseError::from))
            .collect()
    }

    fn sink_error(&self, err: DatabaseError) -> SinkError {
        SinkError::write_failed(&self.name, err.to_string())
    }
}

#[async_trait]
impl Sink for SqliteSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, lead: &LeadRecord) -> Result<WriteStatus, SinkError> {
        self.insert_lead(lead).await.map_err(|e| self.sink_error(e))
    }

    async fn load_identifiers(&self) -> Result<Vec<(String, Uuid)>, SinkError> {
        self.select_identifiers()
            .await
            .map_err(|e| self.sink_error(e))
    }

    fn quarantine_store(&self) -> Option<&dyn QuarantineStore> {
        Some(self)
    }
}

#[async_trait]
impl QuarantineStore for SqliteSink {
    async fn quarantine(&self, entry: &QuarantineEntry) -> Result<(), SinkError> {
        self.insert_quarantine(entry)
            .await
            .map_err(|e| self.sink_error(e))
    }

    async fn quarantined(&self) -> Result<Vec<QuarantineEntry>, SinkError> {
        self.select_quarantine()
            .await
            .map_err(|e| self.sink_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RawRecord;
    use crate::routing::Venue;
    use crate::validation::{Decision, Stage, StageResult, ValidationVerdict};
    use serde_json::{json, Value};

    fn record() -> RawRecord {
        let Value::Object(map) = json!({"address": "7 Birch Ln", "category": "probate"}) else {
            unreachable!()
        };
        RawRecord::new("county", Uuid::new_v4(), Venue::Local, map)
    }

    fn verdict(record: &RawRecord, decision: Decision) -> ValidationVerdict {
        ValidationVerdict::new(
            record.id,
            1,
            vec![StageResult::pass(Stage::Schema, 1.0)],
            0.9,
            decision,
            decision == Decision::Quarantined,
        )
    }

    async fn sink(dir: &tempfile::TempDir) -> SqliteSink {
        let url = format!("sqlite://{}", dir.path().join("leads.db").display());
        SqliteSink::connect("sqlite", &url).await.unwrap()
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir).await;
        let raw = record();
        let lead = LeadRecord::from_accepted(&raw, &verdict(&raw, Decision::Accepted)).unwrap();

        assert_eq!(sink.write(&lead).await.unwrap(), WriteStatus::Stored);
        assert_eq!(sink.write(&lead).await.unwrap(), WriteStatus::AlreadyPresent);

        let ids = sink.load_identifiers().await.unwrap();
        assert_eq!(ids, vec![("7 birch lane".to_string(), lead.id)]);
    }

    #[tokio::test]
    async fn test_migrations_rerun_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let first = sink(&dir).await;
        drop(first);
        let second = sink(&dir).await;
        let applied = migrations::applied(second.pool()).await.unwrap();
        assert_eq!(applied.len(), super::super::schema::MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_quarantine_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir).await;
        let raw = record();
        let entry = QuarantineEntry::new(Uuid::new_v4(), raw.clone(), verdict(&raw, Decision::Quarantined));

        sink.quarantine(&entry).await.unwrap();
        sink.quarantine(&entry).await.unwrap();

        let stored = sink.quarantined().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.id, raw.id);
        assert!(stored[0].verdict.retryable);
    }
}
