//! Request and response bodies for the REST surface.
//!
//! These are standalone structs used as HTTP JSON bodies. Dates serialize as
//! ISO `YYYY-MM-DD`; enums use their wire spellings (`CACHE`, `SCHEDULED`,
//! `SUCCESS`, ...).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{ConsumeSource, SyncHistory, SyncStatus, SyncType};

/// Body of `POST /consume`.
///
/// `date` defaults to today and `transaction_id` is generated when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub date: Option<NaiveDate>,
    /// Amount to consume, minor-currency units. Must be positive.
    pub amount: i64,
    /// Opaque client identifier, echoed back. Generated when absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transaction_id: Option<String>,
    /// Bypass the cache and consume transactionally against the record store.
    #[serde(default)]
    pub force_direct_db: bool,
}

/// Response of `POST /consume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub success: bool,
    pub transaction_id: String,
    pub date: NaiveDate,
    /// The admitted amount; zero when the consume was denied.
    pub amount_consumed: i64,
    pub remaining_limit: i64,
    pub source: ConsumeSource,
    pub latency_ms: f64,
    /// `"Success"`, `"Insufficient limit"`, `"Date not found"`, or
    /// `"Error: <detail>"`.
    pub message: String,
}

/// Read-only projection of one day's limit, served by `GET /limits/*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitView {
    pub date: NaiveDate,
    pub initial_limit: i64,
    pub remaining: i64,
    pub consumed: i64,
    pub transaction_count: i64,
    pub version: i64,
    /// Which tier served this view.
    pub source: ConsumeSource,
}

/// Response of `GET /cache/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    pub enabled: bool,
    pub key_prefix: String,
    /// Live (non-expired) keys in the fast store, both physical keys counted.
    pub entries: u64,
    pub dirty_keys: usize,
    pub script_hits: u64,
    pub script_misses: u64,
}

/// Response of `POST /cache/clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub entries_removed: u64,
}

/// Response of `POST /cache/warm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmResponse {
    pub year: i32,
    pub month: u32,
    pub records_warmed: usize,
}

/// Response of `POST /sync` (manual trigger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunResponse {
    /// `false` when another sync held the guard and this trigger was a no-op.
    pub triggered: bool,
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub records_synced: u64,
    pub failed_keys: u64,
    pub duration_ms: u64,
}

/// Response of `GET /sync/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatsResponse {
    pub enabled: bool,
    pub healthy: bool,
    pub in_progress: bool,
    pub dirty_keys: usize,
    pub consecutive_failures: u32,
    pub seconds_since_last_success: u64,
    pub recent: Vec<SyncHistory>,
}

/// Response of `POST /reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub year: i32,
    pub month: u32,
    pub rows_reset: u64,
    pub records_warmed: usize,
    pub load_test: bool,
}

/// Response of `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub cache_enabled: bool,
    pub sync_healthy: bool,
    /// Millis since epoch.
    pub timestamp: i64,
}

/// JSON error body for 4xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_request_parses_minimal_body() {
        let req: ConsumeRequest = serde_json::from_str(r#"{"amount":100}"#).unwrap();
        assert_eq!(req.amount, 100);
        assert!(req.date.is_none());
        assert!(req.transaction_id.is_none());
        assert!(!req.force_direct_db);
    }

    #[test]
    fn consume_request_parses_full_body() {
        let req: ConsumeRequest = serde_json::from_str(
            r#"{"date":"2025-03-15","amount":250,"transactionId":"tx-9","forceDirectDb":true}"#,
        )
        .unwrap();
        assert_eq!(
            req.date,
            Some(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap())
        );
        assert_eq!(req.transaction_id.as_deref(), Some("tx-9"));
        assert!(req.force_direct_db);
    }

    #[test]
    fn consume_response_serializes_camel_case() {
        let resp = ConsumeResponse {
            success: true,
            transaction_id: "tx-1".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
            amount_consumed: 100,
            remaining_limit: 999_900,
            source: ConsumeSource::Cache,
            latency_ms: 0.4,
            message: "Success".into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["transactionId"], "tx-1");
        assert_eq!(json["remainingLimit"], 999_900);
        assert_eq!(json["source"], "CACHE");
        assert_eq!(json["message"], "Success");
    }

    #[test]
    fn status_response_serializes_camel_case() {
        let resp = StatusResponse {
            cache_enabled: true,
            sync_healthy: false,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(resp).unwrap();
        assert_eq!(json["cacheEnabled"], true);
        assert_eq!(json["syncHealthy"], false);
    }

    #[test]
    fn sync_stats_include_history_rows() {
        let resp = SyncStatsResponse {
            enabled: true,
            healthy: true,
            in_progress: false,
            dirty_keys: 2,
            consecutive_failures: 0,
            seconds_since_last_success: 3,
            recent: vec![SyncHistory {
                sync_type: SyncType::Scheduled,
                status: SyncStatus::Success,
                records_synced: 5,
                duration_ms: 12,
                error_message: None,
                started_at: 1_700_000_000_000,
                completed_at: 1_700_000_000_012,
            }],
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["recent"][0]["syncType"], "SCHEDULED");
        assert_eq!(json["recent"][0]["status"], "SUCCESS");
        assert!(json["recent"][0].get("errorMessage").is_none());
    }
}
