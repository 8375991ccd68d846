//! Derivation of the fields the source does not carry
//!
//! Display handles are derived from the unique key, so they need no second
//! uniqueness pass. Secondary codes are drawn at random and re-drawn when they
//! collide with a code already in the store or already issued in this run.
//! The default credential is hashed once per run and shared by every record.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use sha2::{Digest, Sha512};
use tracing::warn;

use crate::config::ImportConfig;
use crate::models::{AcceptedRecord, NormalizedRecord};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 64;
const SALT_BYTES: usize = 16;

/// Run-scoped `<digest>.<salt>` credential
///
/// The digest is SHA-512 over the passphrase followed by the hex salt. The
/// salt comes from the thread-local CSPRNG and is generated once per run.
#[derive(Clone, PartialEq, Eq)]
pub struct DefaultCredential(Arc<str>);

impl DefaultCredential {
    pub fn generate(passphrase: &str) -> Self {
        let mut salt = [0u8; SALT_BYTES];
        rand::rng().fill_bytes(&mut salt);
        Self::with_salt(passphrase, &hex::encode(salt))
    }

    pub fn with_salt(passphrase: &str, salt: &str) -> Self {
        Self(format!("{}.{}", digest(passphrase, salt), salt).into())
    }

    pub fn shared(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }
}

// Keep the hash out of logs.
impl fmt::Debug for DefaultCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DefaultCredential").field(&"<redacted>").finish()
    }
}

fn digest(passphrase: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(passphrase.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Settings that shape derived values
#[derive(Debug, Clone)]
pub struct DerivationSettings {
    pub display_name_prefix: String,
    pub display_name_digits: usize,
    pub secondary_code_length: usize,
    pub email_domain: String,
}

impl From<&ImportConfig> for DerivationSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            display_name_prefix: config.display_name_prefix.clone(),
            display_name_digits: config.display_name_digits,
            secondary_code_length: config.secondary_code_length,
            email_domain: config.email_domain.clone(),
        }
    }
}

pub struct FieldDeriver {
    settings: DerivationSettings,
    credential: Arc<str>,
    balance: Arc<str>,
    run_started: DateTime<Utc>,
    issued_codes: HashSet<String>,
    code_collisions: usize,
    rng: StdRng,
}

impl FieldDeriver {
    /// `existing_codes` are the secondary codes already taken in the store
    pub fn new(
        settings: DerivationSettings,
        credential: &DefaultCredential,
        balance: &str,
        existing_codes: HashSet<String>,
    ) -> Self {
        Self {
            settings,
            credential: credential.shared(),
            balance: balance.into(),
            run_started: Utc::now(),
            issued_codes: existing_codes,
            code_collisions: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Replace the code generator's randomness with a fixed seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Generated codes that had to be re-drawn
    pub fn code_collisions(&self) -> usize {
        self.code_collisions
    }

    pub fn derive(&mut self, record: NormalizedRecord) -> AcceptedRecord {
        let username = match &record.display_name {
            Some(name) => name.clone(),
            None => self.display_handle(&record.unique_key),
        };
        let full_name = record.display_name.unwrap_or_else(|| username.clone());

        let secondary_code = match record.secondary_code {
            Some(code) => {
                if !self.issued_codes.insert(code.clone()) {
                    warn!(
                        "Supplied secondary code '{}' for {} is already taken",
                        code, record.unique_key
                    );
                }
                code
            }
            None => self.next_code(),
        };

        AcceptedRecord {
            email: format!("{}@{}", record.unique_key, self.settings.email_domain),
            unique_key: record.unique_key,
            username,
            full_name,
            flags: record.flags,
            secondary_code,
            created_at: record.created_at.unwrap_or(self.run_started),
            credential: Arc::clone(&self.credential),
            balance: Arc::clone(&self.balance),
        }
    }

    /// Prefix plus the last N characters of the key
    pub fn display_handle(&self, unique_key: &str) -> String {
        let len = unique_key.chars().count();
        let tail: String = unique_key
            .chars()
            .skip(len.saturating_sub(self.settings.display_name_digits))
            .collect();
        format!("{}{}", self.settings.display_name_prefix, tail)
    }

    fn next_code(&mut self) -> String {
        let mut candidate = self.random_code();
        for _ in 1..MAX_CODE_ATTEMPTS {
            if !self.issued_codes.contains(&candidate) {
                break;
            }
            self.code_collisions += 1;
            candidate = self.random_code();
        }

        if !self.issued_codes.insert(candidate.clone()) {
            warn!(
                "No free secondary code after {} attempts, using colliding code {}",
                MAX_CODE_ATTEMPTS, candidate
            );
        }
        candidate
    }

    fn random_code(&mut self) -> String {
        (0..self.settings.secondary_code_length)
            .map(|_| CODE_ALPHABET[self.rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}
