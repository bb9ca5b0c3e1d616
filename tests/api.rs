//! API endpoint integration tests

use std::time::Duration;

use axum::http::StatusCode;
use courier_broker::ActionResult;
use serde_json::json;

mod common;
use common::{body_json, expect_json, get, post_json, test_broker, test_router};

const TOKEN: &str = "test-token";

#[tokio::test]
async fn health_endpoint() {
    let broker = test_broker("");
    let app = test_router(&broker);

    let response = get(app, "/health", None).await;
    let body = expect_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn producer_routes_require_token_when_gated() {
    let broker = test_broker(TOKEN);
    let app = test_router(&broker);

    let body = json!({"selector": "d1", "action": "toast", "payload": {"text": "hi"}});
    let response = post_json(app.clone(), "/queue", None, body.clone()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = post_json(app.clone(), "/queue", Some("wrong"), body).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get(app, "/status", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // nothing leaked into the queue
    assert_eq!(broker.queue.pending_len("d1"), 0);
}

#[tokio::test]
async fn producer_routes_open_without_token() {
    let broker = test_broker("");
    let app = test_router(&broker);

    let response = get(app, "/status", None).await;
    let body = expect_json(response, StatusCode::OK).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn sync_with_wrong_token_is_rejected() {
    let broker = test_broker(TOKEN);
    let app = test_router(&broker);

    let response = post_json(
        app,
        "/sync",
        None,
        json!({"device_id": "d1", "token": "wrong"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(broker.registry.is_empty());
}

#[tokio::test]
async fn poll_roundtrip_queue_sync_result() {
    let broker = test_broker(TOKEN);
    let app = test_router(&broker);

    // device checks in and registers
    let response = post_json(
        app.clone(),
        "/sync",
        None,
        json!({"device_id": "phone-1", "token": TOKEN}),
    )
    .await;
    let body = expect_json(response, StatusCode::OK).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["actions"].as_array().unwrap().len(), 0);

    // producer enqueues a dialog for the most recent device
    let response = post_json(
        app.clone(),
        "/queue",
        Some(TOKEN),
        json!({
            "action": "dialog",
            "payload": {"title": "Confirm", "text": "Proceed?", "buttons": ["Yes", "No"]},
        }),
    )
    .await;
    let queued = expect_json(response, StatusCode::OK).await;
    assert_eq!(queued["device_id"], "phone-1");
    let action_id = queued["action_id"].as_str().unwrap().to_string();

    // next poll delivers it
    let response = post_json(
        app.clone(),
        "/sync",
        None,
        json!({"device_id": "phone-1", "token": TOKEN}),
    )
    .await;
    let body = expect_json(response, StatusCode::OK).await;
    let actions = body["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["id"], action_id.as_str());
    assert_eq!(actions[0]["action"], "dialog");
    assert_eq!(actions[0]["payload"]["buttons"][0], "Yes");

    // device reports the button press
    let response = post_json(
        app.clone(),
        "/sync",
        None,
        json!({
            "device_id": "phone-1",
            "token": TOKEN,
            "results": [{"id": action_id, "ok": true, "action": "dialog", "data": {"choice": "Yes"}}],
        }),
    )
    .await;
    expect_json(response, StatusCode::OK).await;

    // producer collects the result, popping it
    let response = get(
        app.clone(),
        &format!("/result?action_id={action_id}&pop=true"),
        Some(TOKEN),
    )
    .await;
    let body = expect_json(response, StatusCode::OK).await;
    assert_eq!(body["result"]["data"]["choice"], "Yes");

    // popped, so a second fetch misses
    let response = get(
        app,
        &format!("/result?action_id={action_id}"),
        Some(TOKEN),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_validates_known_action_payloads() {
    let broker = test_broker("");
    let app = test_router(&broker);

    post_json(app.clone(), "/sync", None, json!({"device_id": "d1"})).await;

    // dialog without a title must not enqueue
    let response = post_json(
        app,
        "/queue",
        None,
        json!({"selector": "d1", "action": "dialog", "payload": {"text": "no title"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(broker.queue.pending_len("d1"), 0);
}

#[tokio::test]
async fn queue_for_unknown_device_is_not_found() {
    let broker = test_broker("");
    let app = test_router(&broker);

    let response = post_json(
        app,
        "/queue",
        None,
        json!({"selector": "ghost", "action": "toast", "payload": {"text": "hi"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_with_no_devices_is_not_found() {
    let broker = test_broker("");
    let app = test_router(&broker);

    // "last" cannot resolve when nobody ever checked in
    let response = post_json(
        app,
        "/queue",
        None,
        json!({"action": "toast", "payload": {"text": "hi"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn result_wait_resolves_when_device_reports() {
    let broker = test_broker("");
    let app = test_router(&broker);

    post_json(app.clone(), "/sync", None, json!({"device_id": "d1"})).await;
    let response = post_json(
        app.clone(),
        "/queue",
        None,
        json!({"selector": "d1", "action": "clipboard_get"}),
    )
    .await;
    let queued = expect_json(response, StatusCode::OK).await;
    let action_id = queued["action_id"].as_str().unwrap().to_string();

    // device reports shortly after the producer starts waiting
    let reporter = std::sync::Arc::clone(&broker);
    let report_id = action_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        reporter.results.submit(ActionResult {
            id: report_id,
            ok: true,
            action: "clipboard_get".to_string(),
            data: Some(json!({"text": "copied"})),
            error: None,
            trace: None,
        });
    });

    let response = get(
        app,
        &format!("/result?action_id={action_id}&wait_ms=2000"),
        None,
    )
    .await;
    let body = expect_json(response, StatusCode::OK).await;
    assert_eq!(body["result"]["data"]["text"], "copied");
}

#[tokio::test]
async fn result_wait_times_out() {
    let broker = test_broker("");
    let app = test_router(&broker);

    let response = get(app, "/result?action_id=nope&wait_ms=50", None).await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn status_reflects_devices_and_queues() {
    let broker = test_broker("");
    let app = test_router(&broker);

    post_json(app.clone(), "/sync", None, json!({"device_id": "d1"})).await;
    post_json(app.clone(), "/sync", None, json!({"device_id": "d2"})).await;
    post_json(
        app.clone(),
        "/queue",
        None,
        json!({"selector": "d1", "action": "toast", "payload": {"text": "hi"}}),
    )
    .await;

    let response = get(app, "/status", None).await;
    let body = expect_json(response, StatusCode::OK).await;
    let devices = body["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 2);
    let d1 = devices.iter().find(|d| d["id"] == "d1").unwrap();
    assert_eq!(d1["queue"], 1);
    assert_eq!(d1["transport"], "polling");
}

#[tokio::test]
async fn device_logs_are_exposed() {
    let broker = test_broker("");
    let app = test_router(&broker);

    post_json(
        app.clone(),
        "/sync",
        None,
        json!({"device_id": "d1", "logs": ["bridge started", {"text": "screen on", "level": "debug"}]}),
    )
    .await;

    let response = get(app, "/logs?device_id=d1&limit=10", None).await;
    let body = expect_json(response, StatusCode::OK).await;
    let logs = body["logs"].as_array().unwrap();
    let texts: Vec<&str> = logs.iter().filter_map(|l| l["text"].as_str()).collect();
    assert!(texts.contains(&"bridge started"));
    assert!(texts.contains(&"screen on"));
}

#[tokio::test]
async fn long_poll_sync_delivers_action_enqueued_mid_wait() {
    let broker = test_broker("");
    let app = test_router(&broker);

    post_json(app.clone(), "/sync", None, json!({"device_id": "d1"})).await;

    let producer = std::sync::Arc::clone(&broker);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let dispatcher = courier_broker::Dispatcher::new(producer);
        dispatcher
            .toast(&courier_broker::Selector::Id("d1".to_string()), "wake up")
            .unwrap();
    });

    let response = post_json(
        app,
        "/sync",
        None,
        json!({"device_id": "d1", "wait_ms": 2000}),
    )
    .await;
    let body = body_json(response).await;
    let actions = body["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["payload"]["text"], "wake up");
}
