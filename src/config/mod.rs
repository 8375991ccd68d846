use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::errors::{ImportError, ImportResult};

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub columns: ColumnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Pool size; when unset the pool holds one connection per worker plus
    /// one for the sequential phase
    pub max_connections: Option<u32>,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_input_path")]
    pub input_path: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Passphrase behind the shared default credential
    #[serde(default = "default_passphrase")]
    pub default_passphrase: String,
    #[serde(default = "default_key_pattern")]
    pub key_pattern: String,
    #[serde(default = "default_display_name_prefix")]
    pub display_name_prefix: String,
    #[serde(default = "default_display_name_digits")]
    pub display_name_digits: usize,
    #[serde(default = "default_secondary_code_length")]
    pub secondary_code_length: usize,
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
    /// JSON document stored as every imported user's opening balance
    #[serde(default = "default_balance")]
    pub default_balance: String,
}

/// Header names of the source columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default = "default_key_column")]
    pub key: String,
    #[serde(default = "default_display_name_column")]
    pub display_name: String,
    #[serde(default = "default_privileged_column")]
    pub privileged: String,
    #[serde(default = "default_suspended_column")]
    pub suspended: String,
    #[serde(default = "default_secondary_code_column")]
    pub secondary_code: Option<String>,
    #[serde(default = "default_created_at_column")]
    pub created_at: Option<String>,
}

fn default_database_url() -> String { DEFAULT_DATABASE_URL.to_string() }
fn default_acquire_timeout_secs() -> u64 { DEFAULT_ACQUIRE_TIMEOUT_SECS }
fn default_busy_timeout_secs() -> u64 { DEFAULT_BUSY_TIMEOUT_SECS }
fn default_input_path() -> PathBuf { PathBuf::from(DEFAULT_INPUT_PATH) }
fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }
fn default_workers() -> usize { DEFAULT_WORKERS }
fn default_passphrase() -> String { DEFAULT_PASSPHRASE.to_string() }
fn default_key_pattern() -> String { DEFAULT_KEY_PATTERN.to_string() }
fn default_display_name_prefix() -> String { DEFAULT_DISPLAY_NAME_PREFIX.to_string() }
fn default_display_name_digits() -> usize { DEFAULT_DISPLAY_NAME_DIGITS }
fn default_secondary_code_length() -> usize { DEFAULT_SECONDARY_CODE_LENGTH }
fn default_email_domain() -> String { DEFAULT_EMAIL_DOMAIN.to_string() }
fn default_balance() -> String { DEFAULT_BALANCE.to_string() }
fn default_key_column() -> String { DEFAULT_KEY_COLUMN.to_string() }
fn default_display_name_column() -> String { DEFAULT_DISPLAY_NAME_COLUMN.to_string() }
fn default_privileged_column() -> String { DEFAULT_PRIVILEGED_COLUMN.to_string() }
fn default_suspended_column() -> String { DEFAULT_SUSPENDED_COLUMN.to_string() }
fn default_secondary_code_column() -> Option<String> { Some(DEFAULT_SECONDARY_CODE_COLUMN.to_string()) }
fn default_created_at_column() -> Option<String> { Some(DEFAULT_CREATED_AT_COLUMN.to_string()) }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: None,
            acquire_timeout_secs: default_acquire_timeout_secs(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            default_passphrase: default_passphrase(),
            key_pattern: default_key_pattern(),
            display_name_prefix: default_display_name_prefix(),
            display_name_digits: default_display_name_digits(),
            secondary_code_length: default_secondary_code_length(),
            email_domain: default_email_domain(),
            default_balance: default_balance(),
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            key: default_key_column(),
            display_name: default_display_name_column(),
            privileged: default_privileged_column(),
            suspended: default_suspended_column(),
            secondary_code: default_secondary_code_column(),
            created_at: default_created_at_column(),
        }
    }
}

impl DatabaseConfig {
    /// Pool size needed to give every worker its own connection
    pub fn pool_size(&self, workers: usize) -> u32 {
        self.max_connections
            .unwrap_or_else(|| u32::try_from(workers + 1).unwrap_or(u32::MAX))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl ImportConfig {
    pub fn compiled_key_pattern(&self) -> ImportResult<Regex> {
        Regex::new(&self.key_pattern).map_err(|e| {
            ImportError::configuration(format!("invalid key_pattern '{}': {}", self.key_pattern, e))
        })
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist. Missing keys in a partial file take their defaults.
    pub fn load(path: impl AsRef<Path>) -> ImportResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                ImportError::configuration(format!("cannot read {}: {}", path.display(), e))
            })?;
            let config = toml::from_str(&contents).map_err(|e| {
                ImportError::configuration(format!("cannot parse {}: {}", path.display(), e))
            })?;
            info!("Configuration loaded from: {}", path.display());
            Ok(config)
        } else {
            info!("No configuration file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> ImportResult<()> {
        if self.import.batch_size == 0 {
            return Err(ImportError::configuration("batch_size must be at least 1"));
        }
        if self.import.workers == 0 {
            return Err(ImportError::configuration("workers must be at least 1"));
        }
        if self.import.default_passphrase.is_empty() {
            return Err(ImportError::configuration("default_passphrase must not be empty"));
        }
        if self.import.secondary_code_length == 0 {
            return Err(ImportError::configuration(
                "secondary_code_length must be at least 1",
            ));
        }
        if let Some(max) = self.database.max_connections {
            if (max as usize) < self.import.workers {
                return Err(ImportError::configuration(format!(
                    "max_connections ({}) is smaller than workers ({})",
                    max, self.import.workers
                )));
            }
        }
        serde_json::from_str::<serde_json::Value>(&self.import.default_balance).map_err(|e| {
            ImportError::configuration(format!("default_balance is not valid JSON: {}", e))
        })?;
        self.import.compiled_key_pattern()?;
        Ok(())
    }
}
