use crate::assets::MigrationAssets;
use crate::config::DatabaseConfig;
use crate::errors::{RepositoryError, RepositoryResult};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    /// Open the pool, sized so that each of `workers` committers can hold a
    /// connection of its own while the sequential phase holds another.
    pub async fn new(config: &DatabaseConfig, workers: usize) -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(RepositoryError::connection_failed)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());

        let max_connections = config.pool_size(workers);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(RepositoryError::connection_failed)?;

        debug!(
            "Opened database pool for {} (max {} connections)",
            config.url, max_connections
        );

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> RepositoryResult<()> {
        self.run_embedded_migrations().await
    }

    async fn run_embedded_migrations(&self) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                checksum TEXT NOT NULL,
                execution_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (name, content) in MigrationAssets::get_migrations() {
            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM _migrations WHERE name = ?",
            )
            .bind(&name)
            .fetch_one(&self.pool)
            .await?;

            if existing > 0 {
                continue; // Migration already applied
            }

            let start = std::time::Instant::now();
            let mut transaction = self.pool.begin().await?;

            if let Err(e) = sqlx::query(&content).execute(&mut *transaction).await {
                transaction.rollback().await?;
                return Err(RepositoryError::migration_failed(name, e));
            }

            let execution_time = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
            sqlx::query(
                "INSERT INTO _migrations (name, checksum, execution_time) VALUES (?, ?, ?)",
            )
            .bind(&name)
            .bind(Self::calculate_checksum(&content))
            .bind(execution_time)
            .execute(&mut *transaction)
            .await?;

            transaction.commit().await?;
            info!("Applied migration: {} ({}ms)", name, execution_time);
        }

        Ok(())
    }

    fn calculate_checksum(content: &str) -> String {
        hex::encode(Sha256::digest(content.as_bytes()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("users.db").display()),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::new(&config_for(&dir), 2).await.unwrap();

        database.migrate().await.unwrap();
        database.migrate().await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&database.pool())
            .await
            .unwrap();
        assert_eq!(applied as usize, MigrationAssets::get_migrations().len());

        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&database.pool())
            .await
            .unwrap();
        assert_eq!(users, 0);
    }

    #[tokio::test]
    async fn test_unreachable_database_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!(
                "sqlite://{}",
                dir.path().join("missing").join("users.db").display()
            ),
            ..DatabaseConfig::default()
        };

        let err = Database::new(&config, 1).await.err().unwrap();
        assert!(matches!(err, RepositoryError::ConnectionFailed { .. }));
    }
}
