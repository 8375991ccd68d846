//! The import engine
//!
//! A run has two phases. The sequential phase reads, validates, deduplicates
//! and derives every record on a single blocking thread. The parallel phase
//! commits the resulting batches through a bounded worker pool. Nothing is
//! written to the store until the sequential phase has finished, so a source
//! that turns out to be unreadable aborts the run before any work is done.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ColumnConfig, Config};
use crate::errors::{ImportError, ImportResult, RepositoryError, SourceResult};
use crate::models::{AcceptedRecord, RawRecord, RunReport};
use crate::repositories::UserStore;

pub mod aggregator;
pub mod batcher;
pub mod committer;
pub mod dedup;
pub mod deriver;
pub mod source;
pub mod validator;

pub use aggregator::{CommitTotals, ResultAggregator};
pub use committer::ParallelCommitter;
pub use dedup::{DedupGate, FrozenKeySet};
pub use deriver::{DefaultCredential, DerivationSettings, FieldDeriver};
pub use source::CsvRecordSource;
pub use validator::FieldValidator;

/// Resolved engine settings
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub workers: usize,
    pub passphrase: String,
    pub balance: String,
    pub derivation: DerivationSettings,
    pub key_pattern: Regex,
    pub columns: ColumnConfig,
}

impl ImportSettings {
    pub fn from_config(config: &Config) -> ImportResult<Self> {
        Ok(Self {
            batch_size: config.import.batch_size,
            workers: config.import.workers,
            passphrase: config.import.default_passphrase.clone(),
            balance: config.import.default_balance.clone(),
            derivation: DerivationSettings::from(&config.import),
            key_pattern: config.import.compiled_key_pattern()?,
            columns: config.columns.clone(),
        })
    }
}

/// Output of the sequential phase
#[derive(Debug)]
pub struct PreparedImport {
    pub rows_read: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub accepted: Vec<AcceptedRecord>,
    /// Every key known after the gate ran, read-only from here on
    pub known_keys: FrozenKeySet,
    pub code_collisions: usize,
}

/// Validate, deduplicate and derive every record of `source`, in order.
///
/// Rejections are counted, never raised. The only error is a source that
/// fails to produce a row.
pub fn prepare_records<I>(
    source: I,
    validator: &FieldValidator,
    mut gate: DedupGate,
    mut deriver: FieldDeriver,
) -> SourceResult<PreparedImport>
where
    I: IntoIterator<Item = SourceResult<RawRecord>>,
{
    let mut rows_read = 0;
    let mut invalid = 0;
    let mut accepted = Vec::new();

    for raw in source {
        let raw = raw?;
        rows_read += 1;

        let record = match validator.normalize(&raw) {
            Ok(record) => record,
            Err(rejection) => {
                debug!("Rejected row at line {}: {}", raw.line, rejection);
                invalid += 1;
                continue;
            }
        };

        if !gate.accept(&record) {
            debug!(
                "Skipping duplicate key {} at line {}",
                record.unique_key, raw.line
            );
            continue;
        }

        accepted.push(deriver.derive(record));
    }

    Ok(PreparedImport {
        rows_read,
        invalid,
        duplicates: gate.duplicates(),
        accepted,
        known_keys: gate.freeze(),
        code_collisions: deriver.code_collisions(),
    })
}

pub struct ImportEngine {
    store: Arc<dyn UserStore>,
    settings: ImportSettings,
    cancel: CancellationToken,
}

impl ImportEngine {
    pub fn new(store: Arc<dyn UserStore>, settings: ImportSettings) -> Self {
        Self {
            store,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run from dispatching further batches
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Import the CSV file at `path`. The header row is checked before the
    /// store is touched.
    pub async fn run_file(&self, path: &Path) -> ImportResult<RunReport> {
        let source = CsvRecordSource::open(path, &self.settings.columns)?;
        info!(
            "Importing users from {} ({} columns)",
            path.display(),
            source.headers().len()
        );
        self.run(source).await
    }

    pub async fn run<I>(&self, source: I) -> ImportResult<RunReport>
    where
        I: IntoIterator<Item = SourceResult<RawRecord>> + Send + 'static,
    {
        let started = Instant::now();

        let initial_count = self.store.count().await.map_err(store_unreachable)?;
        let existing_keys = self
            .store
            .existing_keys()
            .await
            .map_err(store_unreachable)?;
        let existing_codes = self
            .store
            .existing_secondary_codes()
            .await
            .map_err(store_unreachable)?;
        info!(
            "Store holds {} users, {} secondary codes taken",
            initial_count,
            existing_codes.len()
        );

        // One credential for the whole run.
        let credential = DefaultCredential::generate(&self.settings.passphrase);
        let validator =
            FieldValidator::new(self.settings.key_pattern.clone(), self.settings.columns.clone());
        let gate = DedupGate::new(existing_keys);
        let deriver = FieldDeriver::new(
            self.settings.derivation.clone(),
            &credential,
            &self.settings.balance,
            existing_codes,
        );

        let prepared = tokio::task::spawn_blocking(move || {
            prepare_records(source, &validator, gate, deriver)
        })
        .await
        .map_err(|e| ImportError::internal(format!("record preparation failed: {}", e)))??;

        info!(
            "Read {} rows: {} accepted, {} duplicates, {} invalid",
            prepared.rows_read,
            prepared.accepted.len(),
            prepared.duplicates,
            prepared.invalid
        );
        debug!(
            "{} keys known after dedup, {} secondary codes re-drawn",
            prepared.known_keys.key_count(),
            prepared.code_collisions
        );

        let batches = batcher::partition(prepared.accepted, self.settings.batch_size);
        let batches_total = batches.len();

        let totals = ParallelCommitter::new(self.settings.workers)
            .with_cancellation(self.cancel.clone())
            .commit(Arc::clone(&self.store), batches)
            .await?;

        let final_count = match self.store.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Could not read final user count: {}", e);
                None
            }
        };

        let report = RunReport {
            initial_count,
            final_count,
            rows_read: prepared.rows_read,
            invalid: prepared.invalid,
            duplicates: prepared.duplicates,
            inserted: totals.inserted,
            failed: totals.failed,
            cancelled: totals.cancelled,
            batches_total,
            batches_committed: totals.batches_committed,
            batches_rolled_back: totals.batches_rolled_back,
            batches_cancelled: totals.batches_cancelled,
        };

        if let Some(delta) = report.store_delta() {
            if !report.is_consistent() {
                warn!(
                    "Store grew by {} but {} rows were inserted; another writer was active",
                    delta, report.inserted
                );
            }
        }
        if !report.is_conserved() {
            warn!(
                "Accounted for {} of {} rows read",
                report.accounted(),
                report.rows_read
            );
        }

        info!("Import finished in {:.2?}", started.elapsed());
        Ok(report)
    }
}

fn store_unreachable(e: RepositoryError) -> ImportError {
    ImportError::store_connect(e.to_string())
}
