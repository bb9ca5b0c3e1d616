//! Per-device pending action queues
//!
//! Each device owns an independent FIFO guarded by its own lock, so a slow
//! or flooded device never blocks enqueueing for another. Draining is
//! destructive: an entry handed to a transport is gone from the queue, and
//! redelivery after a transport failure is deliberately not attempted
//! (queue-exactly-once, transport-best-effort).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;

use crate::action::QueuedAction;

#[derive(Debug, Default)]
struct DeviceQueue {
    pending: Mutex<VecDeque<QueuedAction>>,
    /// Woken on every enqueue; long-pollers and push writers park here
    notify: Notify,
}

/// Pending actions for all devices, FIFO per device
#[derive(Debug)]
pub struct ActionQueue {
    devices: RwLock<HashMap<String, Arc<DeviceQueue>>>,
    max_queue: usize,
}

impl ActionQueue {
    /// Create a queue with the given per-device cap
    #[must_use]
    pub fn new(max_queue: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            max_queue,
        }
    }

    fn device(&self, device_id: &str) -> Arc<DeviceQueue> {
        if let Some(queue) = self.devices.read().unwrap().get(device_id) {
            return Arc::clone(queue);
        }
        let mut devices = self.devices.write().unwrap();
        Arc::clone(devices.entry(device_id.to_string()).or_default())
    }

    /// Append an action to the tail of a device's queue
    ///
    /// Concurrent enqueues for the same device interleave safely and keep
    /// arrival order. When the cap is exceeded the oldest entry is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn enqueue(&self, device_id: &str, action: QueuedAction) {
        let queue = self.device(device_id);
        {
            let mut pending = queue.pending.lock().unwrap();
            pending.push_back(action);
            if pending.len() > self.max_queue
                && let Some(dropped) = pending.pop_front()
            {
                tracing::warn!(
                    device_id,
                    action_id = %dropped.id,
                    "queue cap exceeded, dropped oldest pending action"
                );
            }
        }
        queue.notify.notify_waiters();
    }

    /// Atomically remove and return up to `max` pending, non-expired actions
    ///
    /// Expired entries encountered on the way are discarded without being
    /// returned; they will never appear in a later drain either.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn drain(&self, device_id: &str, max: usize) -> Vec<QueuedAction> {
        let queue = self.device(device_id);
        let mut pending = queue.pending.lock().unwrap();
        let now = Utc::now().timestamp();
        let mut drained = Vec::new();
        while drained.len() < max {
            let Some(action) = pending.pop_front() else {
                break;
            };
            if action.is_expired(now) {
                tracing::debug!(device_id, action_id = %action.id, "discarding expired action");
                continue;
            }
            drained.push(action);
        }
        drained
    }

    /// Number of pending entries for a device (expired included until swept)
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn pending_len(&self, device_id: &str) -> usize {
        self.devices
            .read()
            .unwrap()
            .get(device_id)
            .map_or(0, |q| q.pending.lock().unwrap().len())
    }

    /// Snapshot a device's pending entries for introspection
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn peek(&self, device_id: &str) -> Vec<QueuedAction> {
        self.devices
            .read()
            .unwrap()
            .get(device_id)
            .map_or_else(Vec::new, |q| q.pending.lock().unwrap().iter().cloned().collect())
    }

    /// Suspend until the device has pending actions or `max_wait` elapses
    ///
    /// Returns true when at least one action is pending. Backs both the
    /// long-poll sync path and the push writer loop.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn wait_nonempty(&self, device_id: &str, max_wait: Duration) -> bool {
        let queue = self.device(device_id);
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            // register interest before the emptiness check to avoid a lost wakeup
            notified.as_mut().enable();
            if !queue.pending.lock().unwrap().is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return !queue.pending.lock().unwrap().is_empty();
            }
        }
    }

    /// Drop every expired entry across all devices, returning the count
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn sweep_expired(&self) -> usize {
        let devices = self.devices.read().unwrap();
        let now = Utc::now().timestamp();
        let mut removed = 0;
        for queue in devices.values() {
            let mut pending = queue.pending.lock().unwrap();
            let before = pending.len();
            pending.retain(|a| !a.is_expired(now));
            removed += before - pending.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ToastPayload};

    fn toast(text: &str, ttl: u64) -> QueuedAction {
        let kind = ActionKind::Toast(ToastPayload {
            text: text.to_string(),
        });
        QueuedAction::new(&kind, ttl).unwrap()
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = ActionQueue::new(200);
        for i in 0..5 {
            queue.enqueue("d1", toast(&format!("t{i}"), 300));
        }

        let drained = queue.drain("d1", 10);
        let texts: Vec<&str> = drained
            .iter()
            .map(|a| a.payload["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, ["t0", "t1", "t2", "t3", "t4"]);
    }

    #[test]
    fn drain_is_destructive() {
        let queue = ActionQueue::new(200);
        queue.enqueue("d1", toast("once", 300));
        assert_eq!(queue.drain("d1", 10).len(), 1);
        assert!(queue.drain("d1", 10).is_empty());
    }

    #[test]
    fn drain_respects_max() {
        let queue = ActionQueue::new(200);
        for _ in 0..4 {
            queue.enqueue("d1", toast("x", 300));
        }
        assert_eq!(queue.drain("d1", 3).len(), 3);
        assert_eq!(queue.pending_len("d1"), 1);
    }

    #[test]
    fn expired_actions_are_never_delivered() {
        let queue = ActionQueue::new(200);
        let mut stale = toast("stale", 10);
        stale.ts -= 60;
        queue.enqueue("d1", stale);
        queue.enqueue("d1", toast("live", 300));

        let drained = queue.drain("d1", 10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].payload["text"], "live");
    }

    #[test]
    fn cap_drops_oldest() {
        let queue = ActionQueue::new(2);
        queue.enqueue("d1", toast("a", 300));
        queue.enqueue("d1", toast("b", 300));
        queue.enqueue("d1", toast("c", 300));

        let drained = queue.drain("d1", 10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].payload["text"], "b");
    }

    #[test]
    fn queues_are_independent_per_device() {
        let queue = ActionQueue::new(200);
        queue.enqueue("d1", toast("one", 300));
        queue.enqueue("d2", toast("two", 300));
        assert_eq!(queue.pending_len("d1"), 1);
        assert_eq!(queue.pending_len("d2"), 1);
        queue.drain("d1", 10);
        assert_eq!(queue.pending_len("d2"), 1);
    }

    #[test]
    fn sweep_removes_expired() {
        let queue = ActionQueue::new(200);
        let mut stale = toast("stale", 10);
        stale.ts -= 60;
        queue.enqueue("d1", stale);
        queue.enqueue("d1", toast("live", 300));
        assert_eq!(queue.sweep_expired(), 1);
        assert_eq!(queue.pending_len("d1"), 1);
    }

    #[tokio::test]
    async fn wait_nonempty_wakes_on_enqueue() {
        let queue = Arc::new(ActionQueue::new(200));
        let waiter = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            waiter.wait_nonempty("d1", Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("d1", toast("wake", 300));
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn wait_nonempty_times_out_when_idle() {
        let queue = ActionQueue::new(200);
        assert!(!queue.wait_nonempty("d1", Duration::from_millis(20)).await);
    }
}
