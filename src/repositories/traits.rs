//! Store boundary traits
//!
//! The importer talks to the store only through these traits. A
//! [`UserStore`] answers the run-level questions (counts, taken keys) and
//! hands out [`UserStoreSession`]s, each of which owns one connection
//! exclusively for as long as it lives.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::errors::RepositoryResult;
use crate::models::{Batch, BatchOutcome};

/// Run-level access to the user store
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Total number of users currently stored
    async fn count(&self) -> RepositoryResult<i64>;

    /// Every unique key already present
    async fn existing_keys(&self) -> RepositoryResult<HashSet<String>>;

    /// Every secondary code already present
    async fn existing_secondary_codes(&self) -> RepositoryResult<HashSet<String>>;

    /// Acquire a dedicated connection. The connection is released when the
    /// returned session is dropped.
    async fn open_session(&self) -> RepositoryResult<Box<dyn UserStoreSession>>;
}

/// A connection owned by exactly one committer worker
#[async_trait]
pub trait UserStoreSession: Send {
    /// Insert every record of `batch` inside a single transaction.
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOutcome)` - The transaction committed. Records the store
    ///   rejected individually are counted as failed, the rest as inserted.
    /// * `Err(RepositoryError)` - The transaction itself failed and was rolled
    ///   back; nothing from the batch is stored.
    async fn commit_batch(&mut self, batch: &Batch) -> RepositoryResult<BatchOutcome>;
}
