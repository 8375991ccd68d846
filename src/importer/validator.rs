//! Per-field validation and normalization of raw rows

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::config::ColumnConfig;
use crate::errors::ValidationRejection;
use crate::models::{NormalizedRecord, RawRecord, RecordFlags};

/// Timestamp layouts accepted in the created-at column, tried in order
const CREATED_AT_FORMATS: &[&str] = &["%m/%d/%Y, %H:%M:%S", "%m/%d/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

pub struct FieldValidator {
    key_pattern: Regex,
    columns: ColumnConfig,
}

impl FieldValidator {
    pub fn new(key_pattern: Regex, columns: ColumnConfig) -> Self {
        Self {
            key_pattern,
            columns,
        }
    }

    /// Normalize one row. Invalid input is reported as a rejection, never
    /// as an error.
    pub fn normalize(&self, raw: &RawRecord) -> Result<NormalizedRecord, ValidationRejection> {
        let unique_key = field(raw, &self.columns.key).ok_or(ValidationRejection::MissingKey)?;

        if !self.key_pattern.is_match(unique_key) {
            return Err(ValidationRejection::MalformedKey {
                value: unique_key.to_string(),
            });
        }

        let optional = |column: &Option<String>| {
            column
                .as_deref()
                .and_then(|c| field(raw, c))
                .map(str::to_string)
        };

        Ok(NormalizedRecord {
            unique_key: unique_key.to_string(),
            display_name: field(raw, &self.columns.display_name).map(str::to_string),
            flags: RecordFlags {
                is_privileged: parse_flag(raw.get(&self.columns.privileged)),
                is_suspended: parse_flag(raw.get(&self.columns.suspended)),
            },
            secondary_code: optional(&self.columns.secondary_code),
            created_at: optional(&self.columns.created_at)
                .as_deref()
                .and_then(parse_created_at),
        })
    }
}

/// Trimmed, non-empty value of `column`
fn field<'a>(raw: &'a RawRecord, column: &str) -> Option<&'a str> {
    raw.get(column).map(str::trim).filter(|v| !v.is_empty())
}

/// "yes", "true" and "1" (any case) are true; anything else, including a
/// missing cell, is false
pub fn parse_flag(value: Option<&str>) -> bool {
    value.map_or(false, |v| {
        let v = v.trim();
        v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true") || v == "1"
    })
}

/// Parse a created-at cell; unparseable values yield `None`
pub fn parse_created_at(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    CREATED_AT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use rstest::rstest;

    fn validator() -> FieldValidator {
        FieldValidator::new(
            Regex::new(crate::config::defaults::DEFAULT_KEY_PATTERN).unwrap(),
            ColumnConfig::default(),
        )
    }

    fn row(phone: &str) -> RawRecord {
        RawRecord::from_pairs(
            2,
            [
                ("Phone", phone),
                ("Username", "  alice "),
                ("Is Admin", "Yes"),
                ("Is Banned", "nope"),
            ],
        )
    }

    #[test]
    fn test_valid_row_is_normalized() {
        let record = validator().normalize(&row(" 1111111111 ")).unwrap();
        assert_eq!(record.unique_key, "1111111111");
        assert_eq!(record.display_name.as_deref(), Some("alice"));
        assert!(record.flags.is_privileged);
        assert!(!record.flags.is_suspended);
        assert_eq!(record.secondary_code, None);
        assert_eq!(record.created_at, None);
    }

    #[rstest]
    #[case("12345")]
    #[case("11111111112")]
    #[case("111111111a")]
    #[case("+911111111111")]
    fn test_malformed_keys_are_rejected(#[case] phone: &str) {
        assert_eq!(
            validator().normalize(&row(phone)),
            Err(ValidationRejection::MalformedKey {
                value: phone.to_string()
            })
        );
    }

    #[test]
    fn test_missing_key_is_rejected() {
        assert_eq!(
            validator().normalize(&row("   ")),
            Err(ValidationRejection::MissingKey)
        );

        let no_column = RawRecord::from_pairs(3, [("Username", "bob")]);
        assert_eq!(
            validator().normalize(&no_column),
            Err(ValidationRejection::MissingKey)
        );
    }

    #[rstest]
    #[case(Some("yes"), true)]
    #[case(Some("YES"), true)]
    #[case(Some("True"), true)]
    #[case(Some(" 1 "), true)]
    #[case(Some("no"), false)]
    #[case(Some("0"), false)]
    #[case(Some(""), false)]
    #[case(Some("y"), false)]
    #[case(None, false)]
    fn test_parse_flag(#[case] value: Option<&str>, #[case] expected: bool) {
        assert_eq!(parse_flag(value), expected);
    }

    #[test]
    fn test_optional_columns() {
        let raw = RawRecord::from_pairs(
            2,
            [
                ("Phone", "2222222222"),
                ("Username", ""),
                ("Is Admin", "no"),
                ("Is Banned", "1"),
                ("Referral Code", " ABC12345 "),
                ("Created At", "4/20/2025, 23:58:44"),
            ],
        );
        let record = validator().normalize(&raw).unwrap();
        assert_eq!(record.display_name, None);
        assert!(record.flags.is_suspended);
        assert_eq!(record.secondary_code.as_deref(), Some("ABC12345"));

        let created = record.created_at.unwrap();
        assert_eq!((created.year(), created.month(), created.day()), (2025, 4, 20));
        assert_eq!((created.hour(), created.minute(), created.second()), (23, 58, 44));
    }

    #[test]
    fn test_parse_created_at() {
        assert!(parse_created_at("2025-04-20T10:00:00Z").is_some());
        assert!(parse_created_at("2025-04-20 10:00:00").is_some());
        assert!(parse_created_at("yesterday").is_none());
    }
}
