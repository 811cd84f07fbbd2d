//! `POST /consume` handler.

use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use limitgate_core::messages::api::{ConsumeRequest, ConsumeResponse};

use super::{ApiError, AppState};

/// Runs one consume against the engine.
///
/// `date` defaults to today; `transactionId` is generated when absent and
/// echoed back either way. Business denials come back as 200 with
/// `success = false`; only malformed input earns a 400.
pub async fn consume_handler(
    State(state): State<AppState>,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let _in_flight = state.shutdown.track();

    let date = req.date.unwrap_or_else(|| state.engine.today());
    let transaction_id = req
        .transaction_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let outcome = state
        .engine
        .consume(date, req.amount, req.force_direct_db)
        .await?;

    Ok(Json(ConsumeResponse {
        success: outcome.success,
        transaction_id,
        date,
        amount_consumed: if outcome.success { outcome.amount } else { 0 },
        remaining_limit: outcome.remaining,
        source: outcome.source,
        latency_ms: outcome.latency.as_secs_f64() * 1_000.0,
        message: outcome.message.to_wire(),
    }))
}
