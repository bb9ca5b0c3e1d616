//! Broker core: shared state and the transport-agnostic sync handler
//!
//! Both ingress adapters (poll and push) feed the same [`Broker`]; the core
//! has no transport-specific branching. Producers reach it through the
//! [`crate::dispatch::Dispatcher`] facade.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::action::{ActionKind, QueuedAction, SyncRequest, SyncResponse};
use crate::config::Config;
use crate::kv::KvStore;
use crate::queue::ActionQueue;
use crate::registry::{DeviceEntry, DeviceRegistry, Selector};
use crate::results::ResultStore;
use crate::{Error, Result};

/// A retained diagnostic log line for a device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceLog {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub text: String,
}

/// One device row in the status report
#[derive(Debug, Serialize)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub entry: DeviceEntry,
    /// Pending actions awaiting delivery
    pub queue: usize,
    /// Retained diagnostic log lines
    pub logs: usize,
}

/// Read-only diagnostic snapshot for external tooling
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub ok: bool,
    /// Broker timestamp, unix milliseconds
    pub server_ts: i64,
    pub devices: Vec<DeviceStatus>,
    /// Unconsumed results currently held
    pub results_stored: usize,
}

/// The broker process state: registry, queues, results, KV, device logs
#[derive(Debug)]
pub struct Broker {
    config: Config,
    pub registry: DeviceRegistry,
    pub queue: ActionQueue,
    pub results: ResultStore,
    pub kv: KvStore,
    logs: Mutex<HashMap<String, VecDeque<DeviceLog>>>,
}

impl Broker {
    /// Create a broker, opening the KV database under the configured data dir
    ///
    /// # Errors
    ///
    /// Returns error if the KV database cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let kv = KvStore::open(config.data_dir.join("courier.db"))?;
        Ok(Self::with_kv(config, kv))
    }

    /// Create a broker over an existing KV store (used by tests with an
    /// in-memory database)
    #[must_use]
    pub fn with_kv(config: Config, kv: KvStore) -> Self {
        let queue = ActionQueue::new(config.max_queue);
        Self {
            config,
            registry: DeviceRegistry::new(),
            queue,
            results: ResultStore::new(),
            kv,
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Broker configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Freshness window for "most recent" device resolution
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn fresh_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.device_fresh_secs as i64)
    }

    /// Validate a presented token against the configured one
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRejected`] on mismatch when a token is configured
    pub fn check_token(&self, provided: Option<&str>) -> Result<()> {
        match self.config.token() {
            Some(expected) if provided != Some(expected) => Err(Error::AuthRejected),
            _ => Ok(()),
        }
    }

    /// Resolve a selector and enqueue a validated action for that device
    ///
    /// Resolution happens here, once, at enqueue time. Returns the resolved
    /// device id and the generated action id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] when resolution fails, or a
    /// serialization error for an unencodable payload.
    pub fn enqueue_action(
        &self,
        selector: &Selector,
        kind: &ActionKind,
        ttl: Option<u64>,
    ) -> Result<(String, String)> {
        let device_id = self.registry.resolve(selector, self.fresh_window())?;
        let ttl = ttl.unwrap_or(self.config.default_ttl_secs);
        let action = QueuedAction::new(kind, ttl)?;
        let action_id = action.id.clone();
        tracing::debug!(
            device_id = %device_id,
            action_id = %action_id,
            kind = kind.name(),
            ttl,
            "queued action"
        );
        self.log_device(
            &device_id,
            &format!("queued {} id={action_id}", kind.name()),
            "info",
        );
        self.queue.enqueue(&device_id, action);
        Ok((device_id, action_id))
    }

    /// Process a device check-in, shared by the poll and push transports
    ///
    /// In order: token check (before any state mutation), registry touch,
    /// result submission, log intake, optional long-poll wait, queue drain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRejected`] for a bad token or
    /// [`Error::Validation`] for a missing device id; neither mutates any
    /// queue or store.
    pub async fn handle_sync(
        &self,
        request: SyncRequest,
        client_ip: Option<String>,
    ) -> Result<SyncResponse> {
        self.check_token(request.token.as_deref())?;
        let device_id = request.device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(Error::Validation("missing device_id".to_string()));
        }

        self.registry.touch(&device_id, request.info, client_ip);

        for result in request.results {
            tracing::debug!(
                device_id = %device_id,
                action_id = %result.id,
                ok = result.ok,
                "device reported result"
            );
            self.results.submit(result);
        }

        for line in &request.logs {
            let text = line.text();
            if !text.is_empty() {
                self.log_device(&device_id, text, "info");
            }
        }

        let mut actions = self.queue.drain(&device_id, self.config.max_queue);

        // long poll: park until something is enqueued, bounded by config
        if actions.is_empty()
            && let Some(wait_ms) = request.wait_ms
        {
            let wait = Duration::from_millis(wait_ms.min(self.config.long_poll_max_ms));
            if !wait.is_zero() && self.queue.wait_nonempty(&device_id, wait).await {
                actions = self.queue.drain(&device_id, self.config.max_queue);
            }
        }

        Ok(SyncResponse {
            ok: true,
            device_id,
            server_ts: Utc::now().timestamp_millis(),
            actions,
        })
    }

    /// Append a line to a device's bounded diagnostic log
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn log_device(&self, device_id: &str, text: &str, level: &str) {
        let mut logs = self.logs.lock().unwrap();
        let buffer = logs.entry(device_id.to_string()).or_default();
        buffer.push_back(DeviceLog {
            ts: Utc::now(),
            level: level.to_string(),
            text: text.to_string(),
        });
        while buffer.len() > self.config.max_logs {
            buffer.pop_front();
        }
    }

    /// Tail of a device's diagnostic log
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn device_logs(&self, device_id: &str, limit: usize) -> Vec<DeviceLog> {
        let logs = self.logs.lock().unwrap();
        logs.get(device_id).map_or_else(Vec::new, |buffer| {
            buffer
                .iter()
                .rev()
                .take(limit)
                .rev()
                .cloned()
                .collect()
        })
    }

    /// Diagnostic snapshot of all known devices
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let logs = self.logs.lock().unwrap();
        let devices = self
            .registry
            .list()
            .into_iter()
            .map(|entry| {
                let queue = self.queue.pending_len(&entry.id);
                let log_count = logs.get(&entry.id).map_or(0, VecDeque::len);
                DeviceStatus {
                    entry,
                    queue,
                    logs: log_count,
                }
            })
            .collect();
        drop(logs);
        StatusReport {
            ok: true,
            server_ts: Utc::now().timestamp_millis(),
            devices,
            results_stored: self.results.len(),
        }
    }

    /// Run one expiry sweep across queues, results, and KV rows
    pub fn sweep(&self) {
        let actions = self.queue.sweep_expired();
        let results = self
            .results
            .sweep_expired(Duration::from_secs(self.config.result_retention_secs));
        let kv = self.kv.sweep_expired().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "kv sweep failed");
            0
        });
        if actions + results + kv > 0 {
            tracing::debug!(actions, results, kv, "expiry sweep");
        }
    }

    /// Spawn the periodic expiry sweeper
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        let period = Duration::from_secs(broker.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                broker.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionResult, ToastPayload};
    use serde_json::json;

    fn broker() -> Broker {
        Broker::with_kv(Config::default(), KvStore::open_memory().unwrap())
    }

    fn broker_with_token(token: &str) -> Broker {
        let config = Config {
            auth_token: token.to_string(),
            ..Config::default()
        };
        Broker::with_kv(config, KvStore::open_memory().unwrap())
    }

    fn sync_request(device_id: &str, token: Option<&str>) -> SyncRequest {
        serde_json::from_value(json!({
            "device_id": device_id,
            "token": token,
        }))
        .unwrap()
    }

    #[test]
    fn token_checks() {
        let open = broker();
        assert!(open.check_token(None).is_ok());
        assert!(open.check_token(Some("whatever")).is_ok());

        let gated = broker_with_token("T");
        assert!(gated.check_token(Some("T")).is_ok());
        assert!(matches!(gated.check_token(None), Err(Error::AuthRejected)));
        assert!(matches!(
            gated.check_token(Some("wrong")),
            Err(Error::AuthRejected)
        ));
    }

    #[tokio::test]
    async fn rejected_sync_mutates_nothing() {
        let broker = broker_with_token("T");

        let mut request = sync_request("d1", Some("wrong"));
        request.results = vec![ActionResult {
            id: "a1".to_string(),
            ok: true,
            action: String::new(),
            data: None,
            error: None,
            trace: None,
        }];

        let err = broker.handle_sync(request, None).await.unwrap_err();
        assert!(matches!(err, Error::AuthRejected));
        assert!(broker.registry.is_empty());
        assert!(broker.results.is_empty());
    }

    #[tokio::test]
    async fn sync_touches_and_drains() {
        let broker = broker();
        // device must exist before a literal selector resolves
        broker
            .handle_sync(sync_request("d1", None), Some("127.0.0.1".to_string()))
            .await
            .unwrap();

        let kind = ActionKind::Toast(ToastPayload {
            text: "hi".to_string(),
        });
        let (device_id, action_id) = broker
            .enqueue_action(&Selector::Id("d1".to_string()), &kind, None)
            .unwrap();
        assert_eq!(device_id, "d1");

        let response = broker
            .handle_sync(sync_request("d1", None), None)
            .await
            .unwrap();
        assert!(response.ok);
        assert_eq!(response.actions.len(), 1);
        assert_eq!(response.actions[0].id, action_id);

        // drained, not re-offered
        let again = broker
            .handle_sync(sync_request("d1", None), None)
            .await
            .unwrap();
        assert!(again.actions.is_empty());
    }

    #[tokio::test]
    async fn sync_feeds_results_into_store() {
        let broker = broker();
        let mut request = sync_request("d1", None);
        request.results = vec![ActionResult {
            id: "a1".to_string(),
            ok: true,
            action: "dialog".to_string(),
            data: Some(json!({"choice": "OK"})),
            error: None,
            trace: None,
        }];

        broker.handle_sync(request, None).await.unwrap();
        let stored = broker.results.get("a1", false).unwrap();
        assert_eq!(stored.data.unwrap()["choice"], "OK");
    }

    #[tokio::test]
    async fn enqueue_for_unknown_device_fails() {
        let broker = broker();
        let kind = ActionKind::DeviceInfo;
        let err = broker
            .enqueue_action(&Selector::Id("ghost".to_string()), &kind, None)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn missing_device_id_is_rejected() {
        let broker = broker();
        let err = broker
            .handle_sync(sync_request("  ", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn device_logs_are_bounded() {
        let config = Config {
            max_logs: 3,
            ..Config::default()
        };
        let broker = Broker::with_kv(config, KvStore::open_memory().unwrap());
        for i in 0..5 {
            broker.log_device("d1", &format!("line {i}"), "info");
        }
        let logs = broker.device_logs("d1", 10);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].text, "line 2");
        assert_eq!(logs[2].text, "line 4");
    }

    #[tokio::test]
    async fn status_reports_queue_depth() {
        let broker = broker();
        broker.handle_sync(sync_request("d1", None), None).await.unwrap();
        let kind = ActionKind::DeviceInfo;
        broker
            .enqueue_action(&Selector::Id("d1".to_string()), &kind, None)
            .unwrap();

        let status = broker.status();
        assert!(status.ok);
        assert_eq!(status.devices.len(), 1);
        assert_eq!(status.devices[0].queue, 1);
    }
}
