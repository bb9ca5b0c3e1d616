//! Result store — correlates device reports back to waiting producers
//!
//! Results arrive keyed by action id and are kept until popped or until the
//! retention window lapses. Every waiter parked on an id is woken when its
//! result lands (broadcast, not single-consumer). A result for an id nobody
//! enqueued is accepted and stored like any other; it just ages out unread.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::action::ActionResult;
use crate::{Error, Result};

#[derive(Debug)]
struct StoredResult {
    result: ActionResult,
    arrived_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    results: HashMap<String, StoredResult>,
    waiters: HashMap<String, Vec<oneshot::Sender<ActionResult>>>,
}

/// Holds reported results until consumed or expired
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: Mutex<Inner>,
}

impl ResultStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) the result for an action and wake all waiters
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn submit(&self, result: ActionResult) {
        let mut inner = self.inner.lock().unwrap();
        let waiters = inner.waiters.remove(&result.id).unwrap_or_default();
        inner.results.insert(
            result.id.clone(),
            StoredResult {
                result: result.clone(),
                arrived_at: Utc::now(),
            },
        );
        drop(inner);
        for tx in waiters {
            // a waiter that already timed out is gone; that's fine
            let _ = tx.send(result.clone());
        }
    }

    /// Current result for an action, if any; `pop` removes it
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn get(&self, action_id: &str, pop: bool) -> Option<ActionResult> {
        let mut inner = self.inner.lock().unwrap();
        if pop {
            inner.results.remove(action_id).map(|s| s.result)
        } else {
            inner.results.get(action_id).map(|s| s.result.clone())
        }
    }

    /// Suspend until the result for `action_id` arrives or `timeout` elapses
    ///
    /// A timeout does not cancel or retract the action; a result reported
    /// later is still stored and retrievable via [`Self::get`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the wait elapses.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub async fn wait(&self, action_id: &str, timeout: Duration) -> Result<ActionResult> {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(stored) = inner.results.get(action_id) {
                return Ok(stored.result.clone());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(action_id.to_string()).or_default().push(tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            // sender dropped without a result (waiter list pruned); treat as timeout
            Ok(Err(_)) | Err(_) => Err(Error::Timeout(action_id.to_string())),
        }
    }

    /// Number of stored, unconsumed results
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().results.len()
    }

    /// Whether the store holds no results
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().results.is_empty()
    }

    /// Purge unconsumed results older than `retention` and prune dead waiters
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let before = inner.results.len();
        inner.results.retain(|_, s| s.arrived_at >= cutoff);
        inner.waiters.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
        before - inner.results.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ok_result(id: &str) -> ActionResult {
        ActionResult {
            id: id.to_string(),
            ok: true,
            action: "dialog".to_string(),
            data: Some(serde_json::json!({"choice": "OK"})),
            error: None,
            trace: None,
        }
    }

    #[test]
    fn get_peek_then_pop() {
        let store = ResultStore::new();
        store.submit(ok_result("a1"));

        assert!(store.get("a1", false).is_some());
        assert!(store.get("a1", true).is_some());
        assert!(store.get("a1", false).is_none());
    }

    #[test]
    fn submit_overwrites() {
        let store = ResultStore::new();
        store.submit(ok_result("a1"));
        let mut second = ok_result("a1");
        second.ok = false;
        second.error = Some("retry".to_string());
        store.submit(second);

        let result = store.get("a1", false).unwrap();
        assert!(!result.ok);
    }

    #[test]
    fn orphan_result_is_stored() {
        // nobody ever enqueued this id; the store accepts it anyway
        let store = ResultStore::new();
        store.submit(ok_result("never-enqueued"));
        assert!(store.get("never-enqueued", false).is_some());
    }

    #[tokio::test]
    async fn wait_returns_already_stored_result() {
        let store = ResultStore::new();
        store.submit(ok_result("a1"));
        let result = store.wait("a1", Duration::from_millis(10)).await.unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn wait_resolves_on_submit() {
        let store = Arc::new(ResultStore::new());
        let waiter = Arc::clone(&store);
        let handle =
            tokio::spawn(async move { waiter.wait("a1", Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.submit(ok_result("a1"));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.data.unwrap()["choice"], "OK");
    }

    #[tokio::test]
    async fn wait_times_out() {
        let store = ResultStore::new();
        let err = store.wait("a1", Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn all_waiters_are_woken() {
        let store = Arc::new(ResultStore::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let waiter = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                waiter.wait("a1", Duration::from_secs(5)).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.submit(ok_result("a1"));

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn result_after_timeout_is_still_retrievable() {
        let store = ResultStore::new();
        let err = store.wait("a1", Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_timeout());

        store.submit(ok_result("a1"));
        assert!(store.get("a1", true).is_some());
    }

    #[test]
    fn sweep_purges_old_results() {
        let store = ResultStore::new();
        store.submit(ok_result("a1"));
        assert_eq!(store.sweep_expired(Duration::from_secs(600)), 0);
        assert_eq!(store.sweep_expired(Duration::from_secs(0)), 1);
        assert!(store.is_empty());
    }
}
