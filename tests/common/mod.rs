//! Shared test utilities

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use courier_broker::api::{self, ApiState};
use courier_broker::{Broker, Config, KvStore};
use tower::ServiceExt;

/// Build a broker over an in-memory KV store
#[must_use]
pub fn test_broker(auth_token: &str) -> Arc<Broker> {
    let config = Config {
        auth_token: auth_token.to_string(),
        ..Config::default()
    };
    let kv = KvStore::open_memory().expect("failed to init test kv");
    Arc::new(Broker::with_kv(config, kv))
}

/// Build a router over a broker
#[must_use]
pub fn test_router(broker: &Arc<Broker>) -> axum::Router {
    api::router(ApiState::new(Arc::clone(broker)))
}

/// POST a JSON body and return the response
pub async fn post_json(
    router: axum::Router,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Response<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    router
        .oneshot(
            request
                .body(Body::from(body.to_string()))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed")
}

/// GET a URI and return the response
pub async fn get(router: axum::Router, uri: &str, token: Option<&str>) -> Response<Body> {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    router
        .oneshot(request.body(Body::empty()).expect("failed to build request"))
        .await
        .expect("request failed")
}

/// Decode a response body as JSON
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not valid json")
}

/// Assert status and decode the body in one step
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
