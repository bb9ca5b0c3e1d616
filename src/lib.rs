//! Courier - command-and-result broker for remote devices
//!
//! Producers enqueue asynchronous actions (dialogs, notifications, data
//! operations) for devices they never talk to directly; devices collect
//! their queue over a polling check-in or a push socket and report results
//! back, correlated by action id.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   Producers                      │
//! │    Dispatcher (in-process)  │  REST /queue       │
//! └───────────────────┬──────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────┐
//! │                 Courier Broker                   │
//! │  Registry │ Action Queue │ Result Store │ KV     │
//! └───────────────────┬──────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────┐
//! │                    Devices                       │
//! │      POST /sync (poll)  │  /ws (push)            │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod api;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod kv;
pub mod queue;
pub mod registry;
pub mod results;

pub use action::{ActionKind, ActionResult, QueuedAction, SyncRequest, SyncResponse};
pub use broker::Broker;
pub use config::Config;
pub use dispatch::{Dispatcher, Ticket};
pub use error::{Error, Result};
pub use kv::KvStore;
pub use queue::ActionQueue;
pub use registry::{DeviceRegistry, Selector, Transport};
pub use results::ResultStore;
