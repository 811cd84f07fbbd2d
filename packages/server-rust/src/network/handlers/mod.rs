//! HTTP handler definitions.
//!
//! Defines `AppState` (the shared state carried through axum extractors),
//! the JSON error envelope, and re-exports all handler functions for the
//! router.

pub mod admin;
pub mod consume;
pub mod health;
pub mod limits;

pub use admin::{
    cache_stats_handler, clear_cache_handler, reset_handler, status_handler, sync_stats_handler,
    trigger_sync_handler, warm_cache_handler,
};
pub use consume::consume_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use limits::{day_limit_handler, month_limits_handler, today_limit_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use limitgate_core::messages::api::ErrorResponse;

use crate::engine::{ConsumeError, LimitEngine};
use crate::sync::SyncService;

use super::shutdown::ShutdownController;

/// Shared application state passed to all handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// The consume/query entry point.
    pub engine: Arc<LimitEngine>,
    /// The sync worker, for manual triggers and health.
    pub sync: Arc<SyncService>,
    /// Graceful shutdown controller with in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// Error envelope for non-2xx responses.
///
/// Input errors map to 400, unknown resources to 404; everything the engine
/// can classify itself comes back as a 200 with `success = false` instead.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<ConsumeError> for ApiError {
    fn from(e: ConsumeError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(e.to_string())
    }
}
