//! SQLite user repository
//!
//! Each [`UserSession`] wraps a pooled connection. Dropping the session
//! returns the connection to the pool, and dropping an open transaction
//! rolls it back, so a worker that bails out mid-batch leaves nothing behind.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Pool, Sqlite, SqliteConnection};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::traits::{UserStore, UserStoreSession};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{AcceptedRecord, Batch, BatchOutcome};

/// Repository over the `users` table
#[derive(Clone)]
pub struct UserRepository {
    pool: Pool<Sqlite>,
}

impl UserRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Unique keys currently stored, sorted
    pub async fn stored_keys(&self) -> RepositoryResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>("SELECT phone FROM users ORDER BY phone")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn count(&self) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn existing_keys(&self) -> RepositoryResult<HashSet<String>> {
        let keys = sqlx::query_scalar::<_, String>("SELECT phone FROM users")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys.into_iter().collect())
    }

    async fn existing_secondary_codes(&self) -> RepositoryResult<HashSet<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT referral_code FROM users WHERE referral_code IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(codes.into_iter().collect())
    }

    async fn open_session(&self) -> RepositoryResult<Box<dyn UserStoreSession>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(RepositoryError::connection_failed)?;
        Ok(Box::new(UserSession { conn }))
    }
}

/// A pooled connection dedicated to one committer worker
pub struct UserSession {
    conn: PoolConnection<Sqlite>,
}

#[async_trait]
impl UserStoreSession for UserSession {
    async fn commit_batch(&mut self, batch: &Batch) -> RepositoryResult<BatchOutcome> {
        let mut tx = self.conn.begin().await?;
        let mut inserted = 0;
        let mut failed = 0;

        for record in &batch.records {
            // A savepoint per record keeps a rejected row from poisoning the
            // rest of the batch.
            let mut savepoint = tx.begin().await?;
            match insert_user(&mut savepoint, record)
                .await
                .map_err(RepositoryError::from)
            {
                Ok(()) => {
                    savepoint.commit().await?;
                    inserted += 1;
                }
                Err(e) if e.is_constraint_violation() => {
                    warn!(
                        "Failed to insert user {} in batch {}: {}",
                        record.unique_key, batch.index, e
                    );
                    savepoint.rollback().await?;
                    failed += 1;
                }
                // Dropping the open transaction rolls back the whole batch.
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        debug!(
            "Committed batch {}: {} inserted, {} failed",
            batch.index, inserted, failed
        );

        Ok(BatchOutcome::committed(batch.index, inserted, failed))
    }
}

async fn insert_user(conn: &mut SqliteConnection, record: &AcceptedRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users
         (username, full_name, phone, password, email, balance, created_at, is_admin, is_banned, referral_code)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.username)
    .bind(&record.full_name)
    .bind(&record.unique_key)
    .bind(&*record.credential)
    .bind(&record.email)
    .bind(&*record.balance)
    .bind(record.created_at.to_rfc3339())
    .bind(record.flags.is_privileged)
    .bind(record.flags.is_suspended)
    .bind(&record.secondary_code)
    .execute(conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::Database;
    use crate::models::RecordFlags;
    use chrono::Utc;
    use std::sync::Arc;

    async fn repository(dir: &tempfile::TempDir) -> UserRepository {
        repository_with_busy_timeout(dir, DatabaseConfig::default().busy_timeout_secs).await
    }

    async fn repository_with_busy_timeout(
        dir: &tempfile::TempDir,
        busy_timeout_secs: u64,
    ) -> UserRepository {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("users.db").display()),
            busy_timeout_secs,
            ..DatabaseConfig::default()
        };
        let database = Database::new(&config, 2).await.unwrap();
        database.migrate().await.unwrap();
        UserRepository::new(database.pool())
    }

    fn record(key: &str, code: &str) -> AcceptedRecord {
        AcceptedRecord {
            unique_key: key.to_string(),
            username: format!("user_{}", &key[4..]),
            full_name: format!("user_{}", &key[4..]),
            email: format!("{}@example.com", key),
            flags: RecordFlags {
                is_privileged: false,
                is_suspended: true,
            },
            secondary_code: code.to_string(),
            created_at: Utc::now(),
            credential: Arc::from("digest.salt"),
            balance: Arc::from("{}"),
        }
    }

    #[tokio::test]
    async fn test_commit_batch_inserts_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;

        let batch = Batch {
            index: 0,
            records: vec![record("1111111111", "AAAA0001"), record("2222222222", "AAAA0002")],
        };
        let mut session = repo.open_session().await.unwrap();
        let outcome = session.commit_batch(&batch).await.unwrap();

        assert_eq!(outcome, BatchOutcome::committed(0, 2, 0));
        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(
            repo.existing_keys().await.unwrap(),
            HashSet::from(["1111111111".to_string(), "2222222222".to_string()])
        );
        assert_eq!(repo.existing_secondary_codes().await.unwrap().len(), 2);

        let (password, is_banned): (String, bool) =
            sqlx::query_as("SELECT password, is_banned FROM users WHERE phone = ?")
                .bind("1111111111")
                .fetch_one(&repo.pool)
                .await
                .unwrap();
        assert_eq!(password, "digest.salt");
        assert!(is_banned);
    }

    #[tokio::test]
    async fn test_constraint_violation_fails_only_that_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;

        let mut session = repo.open_session().await.unwrap();
        session
            .commit_batch(&Batch {
                index: 0,
                records: vec![record("1111111111", "AAAA0001")],
            })
            .await
            .unwrap();

        // Same key again, as a concurrent external writer would cause.
        let outcome = session
            .commit_batch(&Batch {
                index: 1,
                records: vec![
                    record("2222222222", "AAAA0002"),
                    record("1111111111", "AAAA0003"),
                    record("3333333333", "AAAA0004"),
                ],
            })
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome::committed(1, 2, 1));
        assert_eq!(
            repo.stored_keys().await.unwrap(),
            vec!["1111111111", "2222222222", "3333333333"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_secondary_code_is_rejected_by_store() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;

        let mut session = repo.open_session().await.unwrap();
        let outcome = session
            .commit_batch(&Batch {
                index: 0,
                records: vec![record("1111111111", "SAME0001"), record("2222222222", "SAME0001")],
            })
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome::committed(0, 1, 1));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lock_timeout_fails_the_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository_with_busy_timeout(&dir, 1).await;

        // Another writer holds the write lock for the whole commit attempt.
        let mut writer = repo.pool.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *writer)
            .await
            .unwrap();

        let mut session = repo.open_session().await.unwrap();
        let result = session
            .commit_batch(&Batch {
                index: 0,
                records: vec![
                    record("1111111111", "AAAA0001"),
                    record("2222222222", "AAAA0002"),
                    record("3333333333", "AAAA0003"),
                ],
            })
            .await;

        let err = result.err().unwrap();
        assert!(!err.is_constraint_violation());
        drop(session);

        sqlx::query("ROLLBACK").execute(&mut *writer).await.unwrap();
        drop(writer);
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_failure_after_inserts_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;

        sqlx::query(
            "CREATE TRIGGER block_phone BEFORE INSERT ON users
             WHEN NEW.phone = '3333333333'
             BEGIN SELECT RAISE(ABORT, 'phone is blocked'); END",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        let mut session = repo.open_session().await.unwrap();
        let result = session
            .commit_batch(&Batch {
                index: 4,
                records: vec![
                    record("1111111111", "AAAA0001"),
                    record("2222222222", "AAAA0002"),
                    record("3333333333", "AAAA0003"),
                ],
            })
            .await;

        assert!(result.is_err());
        drop(session);
        assert_eq!(repo.count().await.unwrap(), 0);

        // The session's connection is usable again once the batch is gone.
        let mut session = repo.open_session().await.unwrap();
        let outcome = session
            .commit_batch(&Batch {
                index: 5,
                records: vec![record("1111111111", "AAAA0001")],
            })
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::committed(5, 1, 0));
        assert_eq!(repo.stored_keys().await.unwrap(), vec!["1111111111"]);
    }
}
