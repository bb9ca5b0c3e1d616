//! Polling transport: the device check-in endpoint
//!
//! A single `POST /sync` carries everything a device has to say (identity,
//! results, logs) and everything the broker has for it (drained actions).
//! Passing `wait_ms` turns the request into a long poll.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};

use super::{error_response, ApiState, ErrorBody};
use crate::action::{SyncRequest, SyncResponse};

/// Build the device sync router
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new().route("/sync", post(sync)).with_state(state)
}

/// Client address as reported by a reverse proxy, if any
pub(super) fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Handle a device check-in
async fn sync(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, (StatusCode, Json<ErrorBody>)> {
    let client_ip = forwarded_ip(&headers);
    state
        .broker
        .handle_sync(request, client_ip)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}
