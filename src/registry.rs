//! Device registry: liveness tracking and selector resolution

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// How a device currently receives actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Device checks in on a timer via the sync endpoint
    Polling,
    /// Device holds an open push channel
    Push,
}

/// Reference to a target device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Explicit device identifier
    Id(String),
    /// The device with the greatest last-seen timestamp within the
    /// freshness window
    MostRecent,
}

impl Selector {
    /// Parse a selector string; empty or `"last"` means most recent
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == "last" {
            Self::MostRecent
        } else {
            Self::Id(raw.to_string())
        }
    }
}

/// A known device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub transport: Transport,
    /// Display metadata from the device's last info snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    /// Client address of the last check-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Registry of known devices
///
/// Entries are created implicitly on first touch and never deleted; a stale
/// entry is merely excluded from [`Selector::MostRecent`] resolution until
/// the device checks in again. Scoped to the broker process, initialized
/// empty at start.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceEntry>>,
}

impl DeviceRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record liveness for a device, creating the entry on first contact
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn touch(&self, device_id: &str, info: Option<Value>, ip: Option<String>) {
        let mut devices = self.devices.write().unwrap();
        let now = Utc::now();
        let entry = devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceEntry {
                id: device_id.to_string(),
                created_at: now,
                last_seen: now,
                transport: Transport::Polling,
                info: None,
                ip: None,
            });
        entry.last_seen = now;
        if let Some(info) = info {
            entry.info = Some(info);
        }
        if let Some(ip) = ip {
            entry.ip = Some(ip);
        }
    }

    /// Record a transport change for a device
    ///
    /// Setting the transport for an unknown device id is a no-op; push
    /// binding always follows a sync frame that created the entry.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_transport(&self, device_id: &str, transport: Transport) {
        let mut devices = self.devices.write().unwrap();
        if let Some(entry) = devices.get_mut(device_id) {
            entry.transport = transport;
        }
    }

    /// Resolve a selector to a concrete device identifier
    ///
    /// A literal id resolves to itself when the device is known.
    /// [`Selector::MostRecent`] picks the freshest device seen within
    /// `fresh_window`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown literal id, or when
    /// no device qualifies as most recent.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn resolve(&self, selector: &Selector, fresh_window: Duration) -> Result<String> {
        let devices = self.devices.read().unwrap();
        match selector {
            Selector::Id(id) => {
                if devices.contains_key(id) {
                    Ok(id.clone())
                } else {
                    Err(Error::DeviceNotFound(id.clone()))
                }
            }
            Selector::MostRecent => {
                let cutoff = Utc::now() - fresh_window;
                devices
                    .values()
                    .filter(|d| d.last_seen >= cutoff)
                    .max_by_key(|d| d.last_seen)
                    .map(|d| d.id.clone())
                    .ok_or_else(|| Error::DeviceNotFound("last".to_string()))
            }
        }
    }

    /// Snapshot all known devices for the status surface
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<DeviceEntry> {
        let devices = self.devices.read().unwrap();
        let mut entries: Vec<DeviceEntry> = devices.values().cloned().collect();
        entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        entries
    }

    /// Number of known devices
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    /// Whether no device has ever checked in
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fresh() -> Duration {
        Duration::seconds(120)
    }

    #[test]
    fn touch_creates_and_updates() {
        let registry = DeviceRegistry::new();
        registry.touch("d1", Some(json!({"model": "tablet"})), None);
        assert_eq!(registry.len(), 1);

        let entry = &registry.list()[0];
        assert_eq!(entry.id, "d1");
        assert_eq!(entry.transport, Transport::Polling);
        assert_eq!(entry.info.as_ref().unwrap()["model"], "tablet");
    }

    #[test]
    fn literal_resolution() {
        let registry = DeviceRegistry::new();
        registry.touch("d1", None, None);

        let id = registry
            .resolve(&Selector::Id("d1".to_string()), fresh())
            .unwrap();
        assert_eq!(id, "d1");

        let err = registry
            .resolve(&Selector::Id("ghost".to_string()), fresh())
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[test]
    fn most_recent_prefers_latest_touch() {
        let registry = DeviceRegistry::new();
        registry.touch("old", None, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.touch("new", None, None);

        let id = registry.resolve(&Selector::MostRecent, fresh()).unwrap();
        assert_eq!(id, "new");
    }

    #[test]
    fn most_recent_with_no_fresh_device_fails() {
        let registry = DeviceRegistry::new();
        let err = registry.resolve(&Selector::MostRecent, fresh()).unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));

        // present but outside the freshness window
        registry.touch("d1", None, None);
        let err = registry
            .resolve(&Selector::MostRecent, Duration::seconds(0) - Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[test]
    fn selector_parsing() {
        assert_eq!(Selector::parse("last"), Selector::MostRecent);
        assert_eq!(Selector::parse("  "), Selector::MostRecent);
        assert_eq!(Selector::parse("d1"), Selector::Id("d1".to_string()));
    }

    #[test]
    fn transport_flips() {
        let registry = DeviceRegistry::new();
        registry.touch("d1", None, None);
        registry.set_transport("d1", Transport::Push);
        assert_eq!(registry.list()[0].transport, Transport::Push);
        registry.set_transport("d1", Transport::Polling);
        assert_eq!(registry.list()[0].transport, Transport::Polling);
    }
}
