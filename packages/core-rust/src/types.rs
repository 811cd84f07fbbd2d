//! Domain types shared between the limit engine, the stores, and the API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single day's spending limit as stored in the record store.
///
/// The record store is the durable source of truth for these rows. While a
/// day is warmed into the fast store, the row is a stale lower-bound snapshot
/// that the sync worker periodically refreshes.
///
/// All monetary fields are minor-currency units (e.g. cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLimit {
    /// Calendar date this limit applies to. Unique per row.
    pub day_date: NaiveDate,
    /// The limit the day started with.
    pub initial_limit: i64,
    /// What is left to spend today.
    pub remaining: i64,
    /// What has been spent today.
    pub consumed: i64,
    /// Number of successful consumes recorded against this day.
    pub transaction_count: i64,
    /// Bumped on every write. Used for optimistic concurrency on the
    /// direct path only; the cached path overwrites blindly.
    pub version: i64,
    /// Creation time, millis since epoch.
    pub created_at: i64,
    /// Last update time, millis since epoch.
    pub updated_at: i64,
}

impl DailyLimit {
    /// Creates a freshly seeded row: full balance, nothing consumed.
    #[must_use]
    pub fn seeded(day_date: NaiveDate, initial_limit: i64, now: i64) -> Self {
        Self {
            day_date,
            initial_limit,
            remaining: initial_limit,
            consumed: 0,
            transaction_count: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `initial_limit = remaining + consumed` holds for this row.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.initial_limit == self.remaining + self.consumed
    }
}

/// Live cache view of one day, assembled from the two physical fast-store keys.
///
/// `remaining` comes from the scalar remaining-key and is authoritative; the
/// consume script never writes a remaining figure into the metadata mapping,
/// so readers must not project `remaining` from metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCacheEntry {
    pub day_date: NaiveDate,
    pub remaining: i64,
    pub initial_limit: i64,
    pub consumed: i64,
    pub transaction_count: i64,
    pub version: i64,
}

/// Which tier actually served a consume or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsumeSource {
    Cache,
    Database,
}

impl ConsumeSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "CACHE",
            Self::Database => "DATABASE",
        }
    }
}

/// What triggered a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncType {
    Scheduled,
    Manual,
    Startup,
    Shutdown,
}

impl SyncType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Manual => "MANUAL",
            Self::Startup => "STARTUP",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

/// Outcome of a sync run.
///
/// `Partial` means some keys were written back and some failed; failed keys
/// stay dirty and are retried on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }
}

/// One row of sync history. Append-only; one per sync attempt that did work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistory {
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub records_synced: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    /// Millis since epoch.
    pub started_at: i64,
    /// Millis since epoch.
    pub completed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn seeded_row_starts_conserved() {
        let row = DailyLimit::seeded(date(2025, 3, 15), 1_000_000, 1_700_000_000_000);
        assert_eq!(row.remaining, 1_000_000);
        assert_eq!(row.consumed, 0);
        assert_eq!(row.transaction_count, 0);
        assert_eq!(row.version, 1);
        assert!(row.is_conserved());
    }

    #[test]
    fn conservation_detects_drift() {
        let mut row = DailyLimit::seeded(date(2025, 3, 15), 100, 0);
        row.remaining = 60;
        assert!(!row.is_conserved());
        row.consumed = 40;
        assert!(row.is_conserved());
    }

    #[test]
    fn sync_enums_use_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&SyncType::Scheduled).unwrap(),
            "\"SCHEDULED\""
        );
        assert_eq!(
            serde_json::to_string(&SyncStatus::Partial).unwrap(),
            "\"PARTIAL\""
        );
        assert_eq!(SyncType::Shutdown.as_str(), "SHUTDOWN");
        assert_eq!(SyncStatus::Failed.as_str(), "FAILED");
    }

    #[test]
    fn consume_source_uses_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&ConsumeSource::Cache).unwrap(),
            "\"CACHE\""
        );
        let decoded: ConsumeSource = serde_json::from_str("\"DATABASE\"").unwrap();
        assert_eq!(decoded, ConsumeSource::Database);
    }

    #[test]
    fn daily_limit_json_is_camel_case() {
        let row = DailyLimit::seeded(date(2025, 1, 2), 500, 42);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["dayDate"], "2025-01-02");
        assert_eq!(json["initialLimit"], 500);
        assert_eq!(json["transactionCount"], 0);
    }
}
