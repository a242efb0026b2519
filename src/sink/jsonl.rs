//! Append-only JSON Lines sink.
//!
//! Leads go to `<dir>/leads.jsonl`, quarantined records to
//! `<dir>/quarantine.jsonl`, one JSON document per line. Ids already on disk
//! are loaded at open so rewrites of the same lead are skipped.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{QuarantineEntry, QuarantineStore, Sink, WriteStatus};
use crate::error::SinkError;
use crate::records::LeadRecord;

const LEADS_FILE: &str = "leads.jsonl";
const QUARANTINE_FILE: &str = "quarantine.jsonl";

#[derive(Debug, Default)]
struct JsonlState {
    /// Lead id to canonical identifier.
    leads: HashMap<Uuid, String>,
    /// Verdict ids already quarantined.
    quarantined: HashSet<Uuid>,
}

#[derive(Debug)]
pub struct JsonlSink {
    name: String,
    dir: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlSink {
    /// Opens the sink directory, creating it if needed.
    pub async fn open(name: impl Into<String>, dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let name = name.into();
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| SinkError::Unusable {
            sink: name.clone(),
            message: format!("cannot create {}: {}", dir.display(), e),
        })?;

        let mut state = JsonlState::default();
        for lead in read_lines::<LeadRecord>(&dir.join(LEADS_FILE)).await {
            state.leads.insert(lead.id, lead.identifier);
        }
        for entry in read_lines::<QuarantineEntry>(&dir.join(QUARANTINE_FILE)).await {
            state.quarantined.insert(entry.verdict.id);
        }

        Ok(Self {
            name,
            dir,
            state: Mutex::new(state),
        })
    }

    pub fn leads_path(&self) -> PathBuf {
        self.dir.join(LEADS_FILE)
    }

    pub fn quarantine_path(&self) -> PathBuf {
        self.dir.join(QUARANTINE_FILE)
    }

    async fn append(&self, path: &Path, line: String) -> Result<(), SinkError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| SinkError::write_failed(&self.name, e.to_string()))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| SinkError::write_failed(&self.name, e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SinkError::write_failed(&self.name, e.to_string()))
    }
}

/// Reads every parseable line of a JSONL file; a missing file reads as empty.
async fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(content) = fs::read_to_string(path).await else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed JSONL line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Sink for JsonlSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, lead: &LeadRecord) -> Result<WriteStatus, SinkError> {
        // Held across the append so concurrent writes of one lead serialize.
        let mut state = self.state.lock().await;
        if state.leads.contains_key(&lead.id) {
            return Ok(WriteStatus::AlreadyPresent);
        }
        let line = serde_json::to_string(lead)
            .map_err(|e| SinkError::write_failed(&self.name, e.to_string()))?;
        self.append(&self.leads_path(), line).await?;
        state.leads.insert(lead.id, lead.identifier.clone());
        Ok(WriteStatus::Stored)
    }

    async fn load_identifiers(&self) -> Result<Vec<(String, Uuid)>, SinkError> {
        let state = self.state.lock().await;
        Ok(state
            .leads
            .iter()
            .map(|(id, identifier)| (identifier.clone(), *id))
            .collect())
    }

    fn quarantine_store(&self) -> Option<&dyn QuarantineStore> {
        Some(self)
    }
}

#[async_trait]
impl QuarantineStore for JsonlSink {
    async fn quarantine(&self, entry: &QuarantineEntry) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        if state.quarantined.contains(&entry.verdict.id) {
            return Ok(());
        }
        let line = serde_json::to_string(entry)
            .map_err(|e| SinkError::write_failed(&self.name, e.to_string()))?;
        self.append(&self.quarantine_path(), line).await?;
        state.quarantined.insert(entry.verdict.id);
        Ok(())
    }

    async fn quarantined(&self) -> Result<Vec<QuarantineEntry>, SinkError> {
        let _guard = self.state.lock().await;
        Ok(read_lines(&self.quarantine_path()).await)
    }
}
