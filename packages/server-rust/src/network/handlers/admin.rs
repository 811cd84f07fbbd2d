//! Admin handlers: cache management, sync control, reset, and status.

use axum::extract::{Query, State};
use axum::Json;
use chrono::Datelike;
use serde::Deserialize;

use limitgate_core::messages::api::{
    CacheStatsResponse, ClearCacheResponse, ResetResponse, StatusResponse, SyncRunResponse,
    SyncStatsResponse, WarmResponse,
};
use limitgate_core::SyncType;

use crate::storage::month_bounds;
use crate::sync::SyncReport;

use super::{ApiError, AppState};

/// How many history rows `/sync/stats` returns.
const RECENT_SYNCS: usize = 20;

/// Query of `POST /cache/warm`: a specific month, or nothing for the
/// current-month warm (which near month end includes the next month).
#[derive(Debug, Deserialize)]
pub struct WarmQuery {
    year: Option<i32>,
    month: Option<u32>,
}

/// `POST /cache/warm?year=&month=`
pub async fn warm_cache_handler(
    State(state): State<AppState>,
    Query(query): Query<WarmQuery>,
) -> Result<Json<WarmResponse>, ApiError> {
    match (query.year, query.month) {
        (Some(year), Some(month)) => {
            if month_bounds(year, month).is_none() {
                return Err(ApiError::bad_request(format!(
                    "{year}-{month} is not a calendar month"
                )));
            }
            let records_warmed = state.engine.warm_month(year, month).await?;
            Ok(Json(WarmResponse {
                year,
                month,
                records_warmed,
            }))
        }
        (None, None) => {
            let today = state.engine.today();
            let records_warmed = state.engine.warm_current_month().await?;
            Ok(Json(WarmResponse {
                year: today.year(),
                month: today.month(),
                records_warmed,
            }))
        }
        _ => Err(ApiError::bad_request(
            "year and month must be supplied together",
        )),
    }
}

/// `POST /cache/clear`
pub async fn clear_cache_handler(
    State(state): State<AppState>,
) -> Result<Json<ClearCacheResponse>, ApiError> {
    let entries_removed = state.engine.clear_cache().await?;
    Ok(Json(ClearCacheResponse { entries_removed }))
}

/// `GET /cache/stats`
pub async fn cache_stats_handler(
    State(state): State<AppState>,
) -> Result<Json<CacheStatsResponse>, ApiError> {
    Ok(Json(state.engine.cache_stats().await?))
}

/// `POST /sync` -- manual trigger, same body and guard as the scheduled tick.
pub async fn trigger_sync_handler(State(state): State<AppState>) -> Json<SyncRunResponse> {
    let report = state.sync.run_once(SyncType::Manual, None).await;
    Json(run_response(&report))
}

/// `GET /sync/stats`
pub async fn sync_stats_handler(
    State(state): State<AppState>,
) -> Result<Json<SyncStatsResponse>, ApiError> {
    Ok(Json(state.sync.stats(RECENT_SYNCS).await?))
}

/// Query of `POST /reset`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetQuery {
    year: i32,
    month: u32,
    #[serde(default)]
    load_test: bool,
}

/// `POST /reset?year=&month=&loadTest=`
pub async fn reset_handler(
    State(state): State<AppState>,
    Query(query): Query<ResetQuery>,
) -> Result<Json<ResetResponse>, ApiError> {
    if month_bounds(query.year, query.month).is_none() {
        return Err(ApiError::bad_request(format!(
            "{}-{} is not a calendar month",
            query.year, query.month
        )));
    }

    let (rows_reset, records_warmed) = if query.load_test {
        state
            .engine
            .reset_for_load_test(query.year, query.month)
            .await?
    } else {
        state.engine.reset(query.year, query.month).await?
    };

    Ok(Json(ResetResponse {
        year: query.year,
        month: query.month,
        rows_reset,
        records_warmed,
        load_test: query.load_test,
    }))
}

/// `GET /status`
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        cache_enabled: state.engine.cache_enabled(),
        sync_healthy: state.sync.healthy(),
        timestamp: state.engine.now_millis(),
    })
}

fn run_response(report: &SyncReport) -> SyncRunResponse {
    SyncRunResponse {
        triggered: !report.skipped,
        sync_type: report.sync_type,
        status: report.status,
        records_synced: report.records_synced,
        failed_keys: report.failed_keys,
        duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
    }
}
