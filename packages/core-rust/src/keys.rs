//! Deterministic fast-store key naming.
//!
//! Every cached day occupies two physical keys: a scalar remaining-key
//! (`<prefix>:remaining:YYYY:MM:DD`) mutated on the hot path, and a
//! meta-key (`<prefix>:meta:YYYY:MM:DD`) holding the slow-moving fields.
//! The date is recoverable by parsing the key name, which the sync worker
//! relies on when draining the dirty set.

use chrono::NaiveDate;

const REMAINING_SEGMENT: &str = "remaining";
const META_SEGMENT: &str = "meta";
const DATE_FORMAT: &str = "%Y:%m:%d";

/// Builds and parses the fast-store keys for one configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    /// Creates a schema for the given key prefix (default `limits`).
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix, without any trailing separator.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name of the scalar key holding the remaining balance for `date`.
    #[must_use]
    pub fn remaining_key(&self, date: NaiveDate) -> String {
        format!(
            "{}:{REMAINING_SEGMENT}:{}",
            self.prefix,
            date.format(DATE_FORMAT)
        )
    }

    /// Name of the mapping key holding the metadata fields for `date`.
    #[must_use]
    pub fn meta_key(&self, date: NaiveDate) -> String {
        format!("{}:{META_SEGMENT}:{}", self.prefix, date.format(DATE_FORMAT))
    }

    /// Recovers the date from a remaining-key name.
    ///
    /// Returns `None` when the key does not belong to this schema or the
    /// date segment is malformed.
    #[must_use]
    pub fn parse_remaining_key(&self, key: &str) -> Option<NaiveDate> {
        let rest = key.strip_prefix(&self.prefix)?;
        let rest = rest.strip_prefix(':')?;
        let rest = rest.strip_prefix(REMAINING_SEGMENT)?;
        let rest = rest.strip_prefix(':')?;
        NaiveDate::parse_from_str(rest, DATE_FORMAT).ok()
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new("limits")
    }
}
