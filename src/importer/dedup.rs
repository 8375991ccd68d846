//! Dedup gate: the sequential filter over unique keys
//!
//! The gate owns the set of keys known to be taken. It starts from the keys
//! already in the store and grows as records are accepted, so a key repeated
//! later in the same input is caught as well. It is driven from a single
//! thread and frozen before the commit phase starts.

use std::collections::HashSet;
use std::sync::Arc;

use crate::models::NormalizedRecord;

#[derive(Debug, Default)]
pub struct DedupGate {
    keys: HashSet<String>,
    duplicates: usize,
}

impl DedupGate {
    /// Start from the keys already present in the store
    pub fn new(existing: HashSet<String>) -> Self {
        Self {
            keys: existing,
            duplicates: 0,
        }
    }

    /// Returns `false` (and counts a duplicate) when the key is already
    /// known; otherwise records the key and returns `true`.
    pub fn accept(&mut self, record: &NormalizedRecord) -> bool {
        if self.keys.contains(&record.unique_key) {
            self.duplicates += 1;
            false
        } else {
            self.keys.insert(record.unique_key.clone());
            true
        }
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn known_keys(&self) -> usize {
        self.keys.len()
    }

    /// Stop mutation and hand out a read-only view of every known key
    pub fn freeze(self) -> FrozenKeySet {
        FrozenKeySet {
            keys: Arc::new(self.keys),
        }
    }
}

/// Immutable snapshot of the key set, cheap to clone and share
#[derive(Debug, Clone)]
pub struct FrozenKeySet {
    keys: Arc<HashSet<String>>,
}

impl FrozenKeySet {
    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Reopen the snapshot as a gate, e.g. to replay the same input
    pub fn into_gate(self) -> DedupGate {
        let keys = Arc::try_unwrap(self.keys).unwrap_or_else(|shared| (*shared).clone());
        DedupGate::new(keys)
    }
}
