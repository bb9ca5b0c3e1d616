//! Token authentication middleware for producer routes
//!
//! Device check-ins carry the token in-band and are validated inside
//! [`crate::broker::Broker::handle_sync`]; this middleware gates only the
//! producer-facing REST surface.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use super::ApiState;

/// Extract the token from the Authorization header
fn extract_token(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware to verify the shared token
///
/// # Errors
///
/// Returns `401 Unauthorized` when a token is configured and the request
/// carries no matching bearer token
pub async fn require_token(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // no token configured: open instance
    if state.broker.config().token().is_none() {
        return Ok(next.run(req).await);
    }

    match state.broker.check_token(extract_token(&req)) {
        Ok(()) => Ok(next.run(req).await),
        Err(_) => {
            tracing::warn!("rejected request with missing or invalid token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
