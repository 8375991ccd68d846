//! Error type definitions for the user importer

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Top-level error type for a run
///
/// Every variant here is fatal: returning one of these from the engine means
/// the run was aborted. Per-record and per-batch failures never use this type.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The record source could not be read
    #[error("Source read error: {0}")]
    Source(#[from] SourceError),

    /// No usable store connection could be acquired
    #[error("Store connection failed: {message}")]
    StoreConnect { message: String },

    /// Repository layer errors outside of a batch commit
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Record source errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// The input could not be opened or read
    #[error("Cannot read {path}: {message}")]
    Io { path: String, message: String },

    /// The input has no header row
    #[error("Missing header row in {path}")]
    MissingHeader { path: String },

    /// A required column is absent from the header row
    #[error("Missing required column: {column}")]
    MissingColumn { column: String },

    /// A data row could not be decoded
    #[error("Malformed row at line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// Store access errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Errors reported by the database driver
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database connection failures
    #[error("Database connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Migration failures
    #[error("Migration failed: {name} - {message}")]
    MigrationFailed { name: String, message: String },
}

/// Reasons a row is rejected by the field validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationRejection {
    /// The unique key column is absent or blank
    #[error("unique key is missing")]
    MissingKey,

    /// The unique key does not match the configured pattern
    #[error("unique key '{value}' has invalid format")]
    MalformedKey { value: String },
}

impl ImportError {
    /// Create a store connection error
    pub fn store_connect<S: Into<String>>(message: S) -> Self {
        Self::StoreConnect {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl SourceError {
    /// Create an I/O error for the given path
    pub fn io<P: Into<String>, M: ToString>(path: P, message: M) -> Self {
        Self::Io {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a missing column error
    pub fn missing_column<C: Into<String>>(column: C) -> Self {
        Self::MissingColumn {
            column: column.into(),
        }
    }

    /// Create a malformed row error
    pub fn malformed<M: ToString>(line: u64, message: M) -> Self {
        Self::Malformed {
            line,
            message: message.to_string(),
        }
    }
}

impl RepositoryError {
    /// Create a connection failed error
    pub fn connection_failed<M: ToString>(message: M) -> Self {
        Self::ConnectionFailed {
            message: message.to_string(),
        }
    }

    /// Create a migration failed error
    pub fn migration_failed<N: Into<String>, M: ToString>(name: N, message: M) -> Self {
        Self::MigrationFailed {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Whether the store rejected a single row on an integrity constraint.
    /// Lock timeouts, I/O failures and every other database error concern
    /// the transaction as a whole and return `false`.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(e)) => matches!(
                e.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ),
            _ => false,
        }
    }
}
