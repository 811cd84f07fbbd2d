//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::ServiceState;

/// Detailed health JSON. Always 200 -- the `state` field says whether the
/// server is actually healthy, so monitoring can tell "up but draining"
/// from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.shutdown.state().as_str(),
        "in_flight": state.shutdown.in_flight(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "sync_healthy": state.sync.healthy(),
    }))
}

/// Liveness probe -- always 200. A failed liveness probe restarts the pod,
/// so this only checks that the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- 200 when ready, 503 during startup, drain, and stop.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.state() == ServiceState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
