//! In-process sink.
//!
//! Holds leads in memory. Used for dry runs and as a stand-in primary when no
//! durable sink is configured; it can also be switched into a failing mode to
//! exercise degraded-sink handling.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{QuarantineEntry, QuarantineStore, Sink, WriteStatus};
use crate::error::SinkError;
use crate::records::LeadRecord;

#[derive(Debug, Default)]
struct MemoryState {
    leads: HashMap<Uuid, LeadRecord>,
    quarantine: HashMap<Uuid, QuarantineEntry>,
}

#[derive(Debug)]
pub struct MemorySink {
    name: String,
    state: Mutex<MemoryState>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
            failing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Makes every subsequent write fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Write calls received, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn leads(&self) -> Vec<LeadRecord> {
        self.lock().leads.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, lead: &LeadRecord) -> Result<WriteStatus, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::write_failed(&self.name, "sink is unavailable"));
        }

        let mut state = self.lock();
        if state.leads.contains_key(&lead.id) {
            return Ok(WriteStatus::AlreadyPresent);
        }
        state.leads.insert(lead.id, lead.clone());
        Ok(WriteStatus::Stored)
    }

    async fn load_identifiers(&self) -> Result<Vec<(String, Uuid)>, SinkError> {
        Ok(self
            .lock()
            .leads
            .values()
            .map(|l| (l.identifier.clone(), l.id))
            .collect())
    }

    fn quarantine_store(&self) -> Option<&dyn QuarantineStore> {
        Some(self)
    }
}

#[async_trait]
impl QuarantineStore for MemorySink {
    async fn quarantine(&self, entry: &QuarantineEntry) -> Result<(), SinkError> {
        self.lock()
            .quarantine
            .insert(entry.verdict.id, entry.clone());
        Ok(())
    }

    async fn quarantined(&self) -> Result<Vec<QuarantineEntry>, SinkError> {
        let mut entries: Vec<_> = self.lock().quarantine.values().cloned().collect();
        entries.sort_by_key(|e| e.quarantined_at);
        Ok(entries)
    }
}
