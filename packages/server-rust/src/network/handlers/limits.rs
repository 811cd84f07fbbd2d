//! Read-only `GET /limits/*` handlers.
//!
//! These serve the cache when a day is warmed and the record store
//! otherwise; they never fill the cache (only consume does, so unused
//! dates stay cold).

use axum::extract::{Path, State};
use axum::Json;
use chrono::NaiveDate;

use limitgate_core::messages::api::LimitView;

use crate::storage::month_bounds;

use super::{ApiError, AppState};

/// `GET /limits/today`
pub async fn today_limit_handler(
    State(state): State<AppState>,
) -> Result<Json<LimitView>, ApiError> {
    let today = state.engine.today();
    lookup(&state, today).await
}

/// `GET /limits/{year}/{month}`
pub async fn month_limits_handler(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<Vec<LimitView>>, ApiError> {
    if month_bounds(year, month).is_none() {
        return Err(ApiError::bad_request(format!(
            "{year}-{month} is not a calendar month"
        )));
    }
    let views = state.engine.get_month(year, month).await?;
    Ok(Json(views))
}

/// `GET /limits/{year}/{month}/{day}`
pub async fn day_limit_handler(
    State(state): State<AppState>,
    Path((year, month, day)): Path<(i32, u32, u32)>,
) -> Result<Json<LimitView>, ApiError> {
    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
        return Err(ApiError::bad_request(format!(
            "{year}-{month}-{day} is not a calendar date"
        )));
    };
    lookup(&state, date).await
}

async fn lookup(state: &AppState, date: NaiveDate) -> Result<Json<LimitView>, ApiError> {
    state
        .engine
        .get_limit(date)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no limit configured for {date}")))
}
