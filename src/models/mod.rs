use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub mod report;

pub use report::RunReport;

/// One row of the source, keyed by header name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the source, header included
    pub line: u64,
    fields: HashMap<String, String>,
}

impl RawRecord {
    pub fn new(line: u64, fields: HashMap<String, String>) -> Self {
        Self { line, fields }
    }

    /// Build a record from `(column, value)` pairs
    pub fn from_pairs<I, K, V>(line: u64, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            line,
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFlags {
    pub is_privileged: bool,
    pub is_suspended: bool,
}

/// A row that passed field validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub unique_key: String,
    pub display_name: Option<String>,
    pub flags: RecordFlags,
    pub secondary_code: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A normalized record with every store column filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedRecord {
    pub unique_key: String,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub flags: RecordFlags,
    pub secondary_code: String,
    pub created_at: DateTime<Utc>,
    /// Run-wide `<digest>.<salt>` credential, shared by every record
    pub credential: Arc<str>,
    /// Run-wide opening balance document
    pub balance: Arc<str>,
}

/// Independently committed group of accepted records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub records: Vec<AcceptedRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The batch transaction committed
    Committed,
    /// The batch transaction was rolled back, or never ran for lack of a connection
    RolledBack,
    /// The batch was never dispatched because the run was cancelled
    Cancelled,
}

/// Terminal result of one batch, produced exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_index: usize,
    pub status: BatchStatus,
    pub inserted: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchOutcome {
    pub fn committed(batch_index: usize, inserted: usize, failed: usize) -> Self {
        Self {
            batch_index,
            status: BatchStatus::Committed,
            inserted,
            failed,
            cancelled: 0,
        }
    }

    pub fn rolled_back(batch_index: usize, batch_size: usize) -> Self {
        Self {
            batch_index,
            status: BatchStatus::RolledBack,
            inserted: 0,
            failed: batch_size,
            cancelled: 0,
        }
    }

    pub fn cancelled(batch_index: usize, batch_size: usize) -> Self {
        Self {
            batch_index,
            status: BatchStatus::Cancelled,
            inserted: 0,
            failed: 0,
            cancelled: batch_size,
        }
    }

    /// Records this outcome accounts for
    pub fn records(&self) -> usize {
        self.inserted + self.failed + self.cancelled
    }
}
