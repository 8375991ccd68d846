/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./users.db";
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

// Import defaults
pub const DEFAULT_INPUT_PATH: &str = "./users.csv";
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_PASSPHRASE: &str = "password";
pub const DEFAULT_KEY_PATTERN: &str = r"^[0-9]{10}$";
pub const DEFAULT_DISPLAY_NAME_PREFIX: &str = "user_";
pub const DEFAULT_DISPLAY_NAME_DIGITS: usize = 6;
pub const DEFAULT_SECONDARY_CODE_LENGTH: usize = 8;
pub const DEFAULT_EMAIL_DOMAIN: &str = "example.com";
pub const DEFAULT_BALANCE: &str = r#"{"INR":0,"BTC":0,"ETH":0,"USDT":0}"#;

// Source column defaults
pub const DEFAULT_KEY_COLUMN: &str = "Phone";
pub const DEFAULT_DISPLAY_NAME_COLUMN: &str = "Username";
pub const DEFAULT_PRIVILEGED_COLUMN: &str = "Is Admin";
pub const DEFAULT_SUSPENDED_COLUMN: &str = "Is Banned";
pub const DEFAULT_SECONDARY_CODE_COLUMN: &str = "Referral Code";
pub const DEFAULT_CREATED_AT_COLUMN: &str = "Created At";
