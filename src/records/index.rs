//! In-memory index of stored leads by canonical identifier.
//!
//! Seeded from the primary sink at run start and updated as leads are
//! stored. Validation queries it for duplicates; the storing stage reserves
//! identifiers in it so two records of the same lead within one run cannot
//! both be written.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::canonical::{bucket_key, jaccard, tokens};

/// Closest stored lead to a candidate identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub identifier: String,
    pub similarity: f64,
}

#[derive(Debug, Default)]
struct IndexState {
    stored: HashMap<String, Uuid>,
    /// Identifiers grouped by house number to keep fuzzy scans small.
    buckets: HashMap<String, Vec<String>>,
    reserved: HashSet<String>,
}

impl IndexState {
    fn insert(&mut self, identifier: &str, lead_id: Uuid) {
        if self.stored.insert(identifier.to_string(), lead_id).is_none() {
            self.buckets
                .entry(bucket_key(identifier).to_string())
                .or_default()
                .push(identifier.to_string());
        }
    }
}

/// Shared canonical-identifier index.
#[derive(Debug, Default)]
pub struct LeadIndex {
    state: RwLock<IndexState>,
}

impl LeadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads identifiers already held by a sink.
    pub fn seed<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, Uuid)>,
    {
        let mut state = self.write();
        for (identifier, lead_id) in entries {
            state.insert(&identifier, lead_id);
        }
    }

    /// Whether a lead with exactly this identifier is stored.
    pub fn contains(&self, identifier: &str) -> bool {
        self.read().stored.contains_key(identifier)
    }

    /// Most similar stored identifier sharing the candidate's bucket.
    pub fn closest(&self, identifier: &str) -> Option<IndexMatch> {
        let state = self.read();
        if state.stored.contains_key(identifier) {
            return Some(IndexMatch {
                identifier: identifier.to_string(),
                similarity: 1.0,
            });
        }

        let candidate = tokens(identifier);
        state
            .buckets
            .get(bucket_key(identifier))?
            .iter()
            .map(|other| IndexMatch {
                similarity: jaccard(&candidate, &tokens(other)),
                identifier: other.clone(),
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
    }

    /// Claims an identifier for storage. Returns `false` if it is already
    /// stored or claimed by another in-flight write.
    pub fn try_reserve(&self, identifier: &str) -> bool {
        let mut state = self.write();
        if state.stored.contains_key(identifier) || state.reserved.contains(identifier) {
            return false;
        }
        state.reserved.insert(identifier.to_string());
        true
    }

    /// Converts a reservation into a stored entry.
    pub fn commit(&self, identifier: &str, lead_id: Uuid) {
        let mut state = self.write();
        state.reserved.remove(identifier);
        state.insert(identifier, lead_id);
    }

    /// Drops a reservation whose write failed.
    pub fn release(&self, identifier: &str) {
        self.write().reserved.remove(identifier);
    }

    pub fn len(&self) -> usize {
        self.read().stored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let index = LeadIndex::new();
        index.seed([("12 oak street".to_string(), Uuid::new_v4())]);
        assert!(index.contains("12 oak street"));
        assert_eq!(index.closest("12 oak street").unwrap().similarity, 1.0);
    }

    #[test]
    fn test_fuzzy_match_within_bucket() {
        let index = LeadIndex::new();
        index.seed([
            ("12 oak street tampa".to_string(), Uuid::new_v4()),
            ("14 oak street tampa".to_string(), Uuid::new_v4()),
        ]);
        let m = index.closest("12 oak street").unwrap();
        assert_eq!(m.identifier, "12 oak street tampa");
        assert!((m.similarity - 0.75).abs() < 1e-9);
        assert!(index.closest("99 oak street").is_none());
    }

    #[test]
    fn test_reservation_lifecycle() {
        let index = LeadIndex::new();
        assert!(index.try_reserve("1 elm street"));
        assert!(!index.try_reserve("1 elm street"));

        index.release("1 elm street");
        assert!(index.try_reserve("1 elm street"));

        index.commit("1 elm street", Uuid::new_v4());
        assert!(!index.try_reserve("1 elm street"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let index = LeadIndex::new();
        let id = Uuid::new_v4();
        index.seed([("5 pine road".to_string(), id), ("5 pine road".to_string(), id)]);
        assert_eq!(index.len(), 1);
    }
}
