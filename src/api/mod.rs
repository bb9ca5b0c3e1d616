//! HTTP API server for the courier broker
//!
//! Two ingress surfaces share one [`Broker`]: devices check in through
//! `POST /sync` (polling) or the `/ws` push socket, and producers drive the
//! queue through the REST routes in [`produce`].

mod auth;
pub mod produce;
pub mod push;
pub mod sync;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::dispatch::Dispatcher;
use crate::{Error, Result};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub broker: Arc<Broker>,
    pub dispatcher: Dispatcher,
}

impl ApiState {
    /// Build API state over a shared broker
    #[must_use]
    pub fn new(broker: Arc<Broker>) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&broker));
        Self { broker, dispatcher }
    }
}

/// Map a broker error to the HTTP status its callers expect
pub(crate) const fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::AuthRejected => StatusCode::UNAUTHORIZED,
        Error::DeviceNotFound(_) | Error::ActionNotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error body shared by all routes
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub ok: bool,
    pub error: String,
}

pub(crate) fn error_response(err: &Error) -> (StatusCode, Json<ErrorBody>) {
    (
        status_for(err),
        Json(ErrorBody {
            ok: false,
            error: err.to_string(),
        }),
    )
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness check
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the router with all routes
#[must_use]
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(sync::router(state.clone()))
        .merge(produce::router(state.clone()))
        .merge(push::router(state))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server bound to the configured address
pub struct ApiServer {
    state: ApiState,
    host: String,
    port: u16,
}

impl ApiServer {
    /// Create a server over a shared broker
    #[must_use]
    pub fn new(broker: Arc<Broker>, host: String, port: u16) -> Self {
        Self {
            state: ApiState::new(broker),
            host,
            port,
        }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        tracing::info!(%addr, "courier broker listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
