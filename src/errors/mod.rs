//! Centralized error handling for the user importer
//!
//! Failures fall into two groups. Fatal conditions (an unreadable source, a
//! store that cannot be reached at startup, invalid configuration) surface as
//! [`ImportError`] and abort the run. Record-level and batch-level problems are
//! absorbed where they happen and only show up as counts in the run report.
//!
//! # Error Categories
//!
//! - **Source Errors**: the tabular input cannot be opened or parsed
//! - **Repository Errors**: store connection, query and migration failures
//! - **Validation Rejections**: a row whose unique key is missing or malformed
//!
//! # Usage
//!
//! ```rust
//! use user_import::errors::{ImportError, ImportResult};
//!
//! fn check_workers(workers: usize) -> ImportResult<usize> {
//!     if workers == 0 {
//!         return Err(ImportError::configuration("workers must be at least 1"));
//!     }
//!     Ok(workers)
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using ImportError
pub type ImportResult<T> = Result<T, ImportError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Source Results
pub type SourceResult<T> = Result<T, SourceError>;
