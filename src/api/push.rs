//! Push transport: WebSocket delivery for connected devices
//!
//! A device opens `/ws` and sends a sync frame to bind the connection. From
//! then on the broker pushes queued actions the moment they are enqueued,
//! instead of waiting for the next poll. The queue itself is shared with the
//! polling path; a device that drops the socket simply falls back to polling
//! and loses nothing that was not already drained.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::sync::forwarded_ip;
use super::ApiState;
use crate::action::{ActionResult, QueuedAction, SyncRequest, SyncResponse};
use crate::registry::Transport;

/// How long the push writer parks on an idle queue before re-checking
const IDLE_WAIT: Duration = Duration::from_secs(30);

/// Outgoing frame from broker to device
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BrokerToDevice {
    /// Response to a sync frame, actions included
    Sync(SyncResponse),
    /// A single action pushed outside the sync cycle
    Action(QueuedAction),
    /// Error frame; the connection stays open unless auth failed
    Error { code: String, message: String },
}

/// Incoming frame from device to broker
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeviceToBroker {
    /// Check-in carrying results and logs, same shape as the poll body
    Sync(SyncRequest),
    /// A single result reported outside the sync cycle
    Result(ActionResult),
    /// Keepalive
    Ping,
}

/// Parse an incoming frame, accepting both the tagged envelope and a bare
/// result document (`{ id, ok, action, data }`) framed individually
fn parse_device_frame(text: &str) -> Result<DeviceToBroker, serde_json::Error> {
    serde_json::from_str::<DeviceToBroker>(text)
        .or_else(|err| match serde_json::from_str::<ActionResult>(text) {
            Ok(result) => Ok(DeviceToBroker::Result(result)),
            Err(_) => Err(err),
        })
}

/// Build the push router
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<ApiState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let client_ip = forwarded_ip(&headers);
    ws.on_upgrade(move |socket| handle_push_socket(socket, state, client_ip))
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &BrokerToDevice) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    }
}

fn invalid_frame(message: &str) -> BrokerToDevice {
    BrokerToDevice::Error {
        code: "invalid_frame".to_string(),
        message: message.to_string(),
    }
}

/// Handle a connected push socket
async fn handle_push_socket(socket: WebSocket, state: ApiState, client_ip: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let mut device_id: Option<String> = None;

    tracing::info!(client_ip = ?client_ip, "push socket connected, awaiting sync frame");

    // first sync frame binds and authenticates the connection
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };

        let Ok(incoming) = parse_device_frame(&text) else {
            if !send_frame(&mut sender, &invalid_frame("expected a sync frame")).await {
                return;
            }
            continue;
        };

        match incoming {
            DeviceToBroker::Sync(mut request) => {
                // a push connection never long-polls; delivery is live
                request.wait_ms = None;
                match state.broker.handle_sync(request, client_ip.clone()).await {
                    Ok(response) => {
                        let id = response.device_id.clone();
                        state.broker.registry.set_transport(&id, Transport::Push);
                        if !send_frame(&mut sender, &BrokerToDevice::Sync(response)).await {
                            return;
                        }
                        tracing::info!(device_id = %id, "push device bound");
                        device_id = Some(id);
                        break;
                    }
                    Err(e) => {
                        let err = BrokerToDevice::Error {
                            code: "sync_rejected".to_string(),
                            message: e.to_string(),
                        };
                        let _ = send_frame(&mut sender, &err).await;
                        return;
                    }
                }
            }
            DeviceToBroker::Result(_) => {
                let err = invalid_frame("must sync before reporting results");
                if !send_frame(&mut sender, &err).await {
                    return;
                }
            }
            DeviceToBroker::Ping => {}
        }
    }

    let Some(device_id) = device_id else {
        tracing::debug!("push socket closed before binding");
        return;
    };

    // writer: forwards sync responses and pushes fresh actions immediately
    let (tx, mut rx) = mpsc::channel::<BrokerToDevice>(16);
    let writer_state = state.clone();
    let writer_device = device_id.clone();
    let writer = tokio::spawn(async move {
        let mut write_failed = false;
        'writing: loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if !send_frame(&mut sender, &frame).await {
                        write_failed = true;
                        break 'writing;
                    }
                }
                ready = writer_state
                    .broker
                    .queue
                    .wait_nonempty(&writer_device, IDLE_WAIT) =>
                {
                    if !ready {
                        continue;
                    }
                    let max = writer_state.broker.config().max_queue;
                    for action in writer_state.broker.queue.drain(&writer_device, max) {
                        if !send_frame(&mut sender, &BrokerToDevice::Action(action)).await {
                            write_failed = true;
                            break 'writing;
                        }
                    }
                }
            }
        }
        // once the writer stops, push delivery is over for this socket;
        // flip the transport here rather than waiting for the read half
        writer_state
            .broker
            .registry
            .set_transport(&writer_device, Transport::Polling);
        if write_failed {
            tracing::warn!(device_id = %writer_device, "push write failed, demoted to polling");
        }
    });

    // reader: later frames carry results and sync check-ins
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let incoming = match parse_device_frame(&text) {
                    Ok(incoming) => incoming,
                    Err(e) => {
                        let err = invalid_frame(&format!("unparseable frame: {e}"));
                        if tx.send(err).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                match incoming {
                    DeviceToBroker::Sync(mut request) => {
                        // the writer already pushes live; a blocking wait here
                        // would stall result intake
                        request.wait_ms = None;
                        match state.broker.handle_sync(request, client_ip.clone()).await {
                            Ok(response) => {
                                if tx.send(BrokerToDevice::Sync(response)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(device_id = %device_id, error = %e, "push sync rejected");
                                let err = BrokerToDevice::Error {
                                    code: "sync_rejected".to_string(),
                                    message: e.to_string(),
                                };
                                if tx.send(err).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    DeviceToBroker::Result(result) => {
                        tracing::debug!(
                            device_id = %device_id,
                            action_id = %result.id,
                            ok = result.ok,
                            "push device reported result"
                        );
                        state.broker.results.submit(result);
                    }
                    DeviceToBroker::Ping => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // closing the channel wakes the writer out of its idle wait and ends it
    // without cancelling a drain in flight
    drop(tx);
    let _ = writer.await;
    state
        .broker
        .registry
        .set_transport(&device_id, Transport::Polling);
    tracing::info!(device_id = %device_id, "push device disconnected, demoted to polling");
}
