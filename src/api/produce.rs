//! Producer-facing REST routes
//!
//! Enqueue actions, fetch or await results, and inspect broker state. All
//! routes sit behind the token middleware.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{auth, error_response, ApiState, ErrorBody};
use crate::action::ActionResult;
use crate::broker::{DeviceLog, StatusReport};
use crate::registry::Selector;

/// Build the producer router
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/queue", post(queue_action))
        .route("/result", get(get_result))
        .route("/status", get(status))
        .route("/logs", get(device_logs))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .with_state(state)
}

/// Request body for enqueueing an action
#[derive(Debug, Deserialize)]
pub struct QueueBody {
    /// Device selector; omit or pass "last" for the most recent device
    #[serde(default)]
    pub selector: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    pub ttl: Option<u64>,
}

/// Response for a queued action
#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub ok: bool,
    pub device_id: String,
    pub action_id: String,
}

async fn queue_action(
    State(state): State<ApiState>,
    Json(body): Json<QueueBody>,
) -> Result<Json<QueueResponse>, (StatusCode, Json<ErrorBody>)> {
    let selector = Selector::parse(&body.selector);
    let payload = if body.payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        body.payload
    };
    let ticket = state
        .dispatcher
        .send_raw(&selector, &body.action, payload, body.ttl)
        .map_err(|e| error_response(&e))?;
    Ok(Json(QueueResponse {
        ok: true,
        device_id: ticket.device_id,
        action_id: ticket.action_id,
    }))
}

/// Query parameters for fetching a result
#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub action_id: String,
    /// Remove the result once returned
    #[serde(default)]
    pub pop: bool,
    /// Wait up to this long for the result to arrive
    pub wait_ms: Option<u64>,
}

/// Response wrapping a stored result
#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub ok: bool,
    pub result: ActionResult,
}

async fn get_result(
    State(state): State<ApiState>,
    Query(query): Query<ResultQuery>,
) -> Result<Json<ResultResponse>, (StatusCode, Json<ErrorBody>)> {
    if let Some(wait_ms) = query.wait_ms {
        let wait = Duration::from_millis(wait_ms.min(state.broker.config().long_poll_max_ms));
        let result = state
            .dispatcher
            .wait_result(&query.action_id, wait)
            .await
            .map_err(|e| error_response(&e))?;
        if query.pop {
            let _ = state.dispatcher.get_result(&query.action_id, true);
        }
        return Ok(Json(ResultResponse { ok: true, result }));
    }

    state
        .dispatcher
        .get_result(&query.action_id, query.pop)
        .map(|result| Json(ResultResponse { ok: true, result }))
        .ok_or_else(|| {
            error_response(&crate::Error::ActionNotFound(query.action_id.clone()))
        })
}

async fn status(State(state): State<ApiState>) -> Json<StatusReport> {
    Json(state.broker.status())
}

/// Query parameters for the device log tail
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub device_id: String,
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

const fn default_log_limit() -> usize {
    50
}

/// Response wrapping a device log tail
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub ok: bool,
    pub device_id: String,
    pub logs: Vec<DeviceLog>,
}

async fn device_logs(
    State(state): State<ApiState>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsResponse> {
    let logs = state.broker.device_logs(&query.device_id, query.limit);
    Json(LogsResponse {
        ok: true,
        device_id: query.device_id,
        logs,
    })
}
