//! Wire-facing message schemas.
//!
//! All request/response bodies for the REST surface live here so that the
//! server crate and external clients agree on one set of JSON shapes. Every
//! struct uses `#[serde(rename_all = "camelCase")]` to match the public API.

pub mod api;

pub use api::{
    CacheStatsResponse, ClearCacheResponse, ConsumeRequest, ConsumeResponse, ErrorResponse,
    LimitView, ResetResponse, StatusResponse, SyncRunResponse, SyncStatsResponse, WarmResponse,
};
