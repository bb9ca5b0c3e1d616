//! Action catalogue and wire types
//!
//! Every action the broker can dispatch is a variant of [`ActionKind`] with a
//! typed payload, so required fields are checked at construction time while
//! the wire encoding stays a plain `{ action, payload }` document. Kinds the
//! broker does not know are carried through opaquely as [`ActionKind::Other`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

/// A pending action as queued and delivered to devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Globally unique action identifier
    pub id: String,
    /// Wire tag of the action kind
    pub action: String,
    /// Opaque kind-specific payload document
    pub payload: Value,
    /// Seconds the action stays deliverable after `ts`
    pub ttl: u64,
    /// Enqueue timestamp, unix seconds
    pub ts: i64,
}

impl QueuedAction {
    /// Build a queue entry from a validated kind, stamping id and enqueue time
    ///
    /// # Errors
    ///
    /// Returns error if the payload fails to serialize
    pub fn new(kind: &ActionKind, ttl: u64) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().simple().to_string(),
            action: kind.name().to_string(),
            payload: kind.payload()?,
            ttl,
            ts: Utc::now().timestamp(),
        })
    }

    /// Whether the TTL has elapsed at unix time `now`
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn is_expired(&self, now: i64) -> bool {
        now.saturating_sub(self.ts) > self.ttl as i64
    }
}

/// A result reported by a device for an executed action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Identifier of the action this answers
    pub id: String,
    /// Whether the device executed the action successfully
    pub ok: bool,
    /// Wire tag of the executed action, echoed back by the device
    #[serde(default)]
    pub action: String,
    /// Result document on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional diagnostic trace on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ActionResult {
    /// Convert a failed result into the error it represents
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceFailure`] when `ok` is false
    pub fn into_checked(self) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(Error::DeviceFailure {
                error: self.error.unwrap_or_else(|| "unknown error".to_string()),
                trace: self.trace,
            })
        }
    }
}

/// A diagnostic log line reported by a device
///
/// Devices send either a bare string or a `{ text, level }` document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LogLine {
    Entry {
        text: String,
        #[serde(default)]
        level: Option<String>,
    },
    Text(String),
}

impl LogLine {
    /// The log message text
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Entry { text, .. } | Self::Text(text) => text,
        }
    }
}

/// Device check-in document, shared by the poll and push transports
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    pub device_id: String,
    /// Shared authentication token; required when the broker has one configured
    #[serde(default)]
    pub token: Option<String>,
    /// Device info snapshot (display metadata), stored on the registry entry
    #[serde(default)]
    pub info: Option<Value>,
    /// Log lines accumulated since the last check-in
    #[serde(default)]
    pub logs: Vec<LogLine>,
    /// Results for actions executed since the last check-in
    #[serde(default)]
    pub results: Vec<ActionResult>,
    /// Device-side timestamp, unix seconds (informational)
    #[serde(default)]
    pub ts: Option<i64>,
    /// Long-poll bound: suspend up to this many milliseconds when the queue
    /// is empty. Clamped to the configured maximum.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Response to a device check-in: the ordered batch of actions to execute
#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub ok: bool,
    pub device_id: String,
    /// Broker timestamp, unix milliseconds
    pub server_ts: i64,
    pub actions: Vec<QueuedAction>,
}

fn default_true() -> bool {
    true
}

fn default_intensity() -> f64 {
    1.0
}

fn default_buttons() -> Vec<String> {
    vec!["OK".to_string()]
}

fn default_share_title() -> String {
    "Share".to_string()
}

fn default_select_chat_title() -> String {
    "Select chat".to_string()
}

fn default_render_width() -> u32 {
    1024
}

fn default_render_height() -> u32 {
    768
}

fn default_bg_color() -> [u8; 3] {
    [26, 30, 36]
}

fn default_file_prefix() -> String {
    "courier_".to_string()
}

fn default_recent_limit() -> u32 {
    20
}

fn default_kv_table() -> String {
    "courier".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToastPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogPayload {
    pub title: String,
    pub text: String,
    #[serde(default = "default_buttons")]
    pub buttons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuPayload {
    pub title: String,
    pub message: String,
    /// Items are either plain labels or structured entries; opaque to the broker
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default = "default_true")]
    pub multiline: bool,
    #[serde(default)]
    pub max_len: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenEditorPayload {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetPayload {
    /// Panel markup; the broker does not interpret it
    pub dsl: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetUpdatePayload {
    pub sheet_id: String,
    pub dsl: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetClosePayload {
    pub sheet_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectChatPayload {
    #[serde(default = "default_select_chat_title")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RipplePayload {
    #[serde(default = "default_intensity")]
    pub intensity: f64,
    #[serde(default = "default_true")]
    pub vibrate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenUrlPayload {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardSetPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyDialogPayload {
    pub sender_name: String,
    pub message: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareTextPayload {
    pub text: String,
    #[serde(default = "default_share_title")]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareFilePayload {
    pub path: String,
    #[serde(default = "default_share_title")]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPngPayload {
    pub url: String,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderHtmlPayload {
    pub html: String,
    #[serde(default = "default_render_width")]
    pub width: u32,
    #[serde(default = "default_render_height")]
    pub height: u32,
    #[serde(default = "default_bg_color")]
    pub bg_color: [u8; 3],
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default)]
    pub send: bool,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMessagesPayload {
    pub dialog_id: i64,
    #[serde(default = "default_recent_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataWritePayload {
    pub filename: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataReadPayload {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvSetPayload {
    pub key: String,
    pub value: Value,
    #[serde(default = "default_kv_table")]
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvGetPayload {
    pub key: String,
    #[serde(default = "default_kv_table")]
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvGetIntPayload {
    pub key: String,
    #[serde(default)]
    pub default: i64,
    #[serde(default = "default_kv_table")]
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvDeletePrefixPayload {
    pub prefix: String,
    #[serde(default = "default_kv_table")]
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipInstallPayload {
    /// Package name or list of names
    pub packages: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecPayload {
    pub code: String,
}

/// The closed catalogue of dispatchable action kinds
///
/// Payload shapes follow the device-side contract; the broker validates them
/// but never interprets kind-specific semantics.
#[derive(Debug, Clone)]
pub enum ActionKind {
    Toast(ToastPayload),
    Dialog(DialogPayload),
    Menu(MenuPayload),
    Prompt(PromptPayload),
    OpenEditor(OpenEditorPayload),
    Sheet(SheetPayload),
    SheetUpdate(SheetUpdatePayload),
    SheetClose(SheetClosePayload),
    SelectChat(SelectChatPayload),
    Ripple(RipplePayload),
    OpenUrl(OpenUrlPayload),
    ClipboardSet(ClipboardSetPayload),
    ClipboardGet,
    Notify(NotifyPayload),
    NotifyDialog(NotifyDialogPayload),
    Tts(TtsPayload),
    ShareText(ShareTextPayload),
    ShareFile(ShareFilePayload),
    SendPng(SendPngPayload),
    RenderHtml(RenderHtmlPayload),
    DeviceInfo,
    RecentMessages(RecentMessagesPayload),
    DataWrite(DataWritePayload),
    DataRead(DataReadPayload),
    DataList,
    DataDelete,
    KvSet(KvSetPayload),
    KvGet(KvGetPayload),
    KvGetInt(KvGetIntPayload),
    KvDeletePrefix(KvDeletePrefixPayload),
    PipInstall(PipInstallPayload),
    Exec(ExecPayload),
    /// Unknown/future kind, carried through without validation
    Other { action: String, payload: Value },
}

impl ActionKind {
    /// Wire tag for this kind
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Toast(_) => "toast",
            Self::Dialog(_) => "dialog",
            Self::Menu(_) => "menu",
            Self::Prompt(_) => "prompt",
            Self::OpenEditor(_) => "open_editor",
            Self::Sheet(_) => "sheet",
            Self::SheetUpdate(_) => "sheet_update",
            Self::SheetClose(_) => "sheet_close",
            Self::SelectChat(_) => "select_chat",
            Self::Ripple(_) => "ripple",
            Self::OpenUrl(_) => "open_url",
            Self::ClipboardSet(_) => "clipboard_set",
            Self::ClipboardGet => "clipboard_get",
            Self::Notify(_) => "notify",
            Self::NotifyDialog(_) => "notify_dialog",
            Self::Tts(_) => "tts",
            Self::ShareText(_) => "share_text",
            Self::ShareFile(_) => "share_file",
            Self::SendPng(_) => "send_png",
            Self::RenderHtml(_) => "render_html",
            Self::DeviceInfo => "device_info",
            Self::RecentMessages(_) => "recent_messages",
            Self::DataWrite(_) => "data_write",
            Self::DataRead(_) => "data_read",
            Self::DataList => "data_list",
            Self::DataDelete => "data_delete",
            Self::KvSet(_) => "kv_set",
            Self::KvGet(_) => "kv_get",
            Self::KvGetInt(_) => "kv_get_int",
            Self::KvDeletePrefix(_) => "kv_delete_prefix",
            Self::PipInstall(_) => "pip_install",
            Self::Exec(_) => "exec",
            Self::Other { action, .. } => action,
        }
    }

    /// Serialize the payload into its opaque wire document
    ///
    /// # Errors
    ///
    /// Returns error if the payload fails to serialize
    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Self::Toast(p) => serde_json::to_value(p)?,
            Self::Dialog(p) => serde_json::to_value(p)?,
            Self::Menu(p) => serde_json::to_value(p)?,
            Self::Prompt(p) => serde_json::to_value(p)?,
            Self::OpenEditor(p) => serde_json::to_value(p)?,
            Self::Sheet(p) => serde_json::to_value(p)?,
            Self::SheetUpdate(p) => serde_json::to_value(p)?,
            Self::SheetClose(p) => serde_json::to_value(p)?,
            Self::SelectChat(p) => serde_json::to_value(p)?,
            Self::Ripple(p) => serde_json::to_value(p)?,
            Self::OpenUrl(p) => serde_json::to_value(p)?,
            Self::ClipboardSet(p) => serde_json::to_value(p)?,
            Self::Notify(p) => serde_json::to_value(p)?,
            Self::NotifyDialog(p) => serde_json::to_value(p)?,
            Self::Tts(p) => serde_json::to_value(p)?,
            Self::ShareText(p) => serde_json::to_value(p)?,
            Self::ShareFile(p) => serde_json::to_value(p)?,
            Self::SendPng(p) => serde_json::to_value(p)?,
            Self::RenderHtml(p) => serde_json::to_value(p)?,
            Self::RecentMessages(p) => serde_json::to_value(p)?,
            Self::DataWrite(p) => serde_json::to_value(p)?,
            Self::DataRead(p) => serde_json::to_value(p)?,
            Self::KvSet(p) => serde_json::to_value(p)?,
            Self::KvGet(p) => serde_json::to_value(p)?,
            Self::KvGetInt(p) => serde_json::to_value(p)?,
            Self::KvDeletePrefix(p) => serde_json::to_value(p)?,
            Self::PipInstall(p) => serde_json::to_value(p)?,
            Self::Exec(p) => serde_json::to_value(p)?,
            Self::ClipboardGet | Self::DeviceInfo | Self::DataList | Self::DataDelete => {
                Value::Object(serde_json::Map::new())
            }
            Self::Other { payload, .. } => payload.clone(),
        };
        Ok(value)
    }

    /// Parse a wire `{ action, payload }` pair, validating known kinds
    ///
    /// Unknown tags pass through as [`Self::Other`]; a known tag with a
    /// payload missing required fields fails validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the payload shape is wrong for
    /// its kind
    pub fn from_wire(action: &str, payload: Value) -> Result<Self> {
        fn parse<T: serde::de::DeserializeOwned>(action: &str, payload: Value) -> Result<T> {
            serde_json::from_value(payload)
                .map_err(|e| Error::Validation(format!("{action}: {e}")))
        }

        let kind = match action {
            "toast" => Self::Toast(parse(action, payload)?),
            "dialog" => Self::Dialog(parse(action, payload)?),
            "menu" => Self::Menu(parse(action, payload)?),
            "prompt" => Self::Prompt(parse(action, payload)?),
            "open_editor" => Self::OpenEditor(parse(action, payload)?),
            "sheet" => Self::Sheet(parse(action, payload)?),
            "sheet_update" => Self::SheetUpdate(parse(action, payload)?),
            "sheet_close" => Self::SheetClose(parse(action, payload)?),
            "select_chat" => Self::SelectChat(parse(action, payload)?),
            "ripple" => Self::Ripple(parse(action, payload)?),
            "open_url" => Self::OpenUrl(parse(action, payload)?),
            "clipboard_set" => Self::ClipboardSet(parse(action, payload)?),
            "clipboard_get" => Self::ClipboardGet,
            "notify" => Self::Notify(parse(action, payload)?),
            "notify_dialog" => Self::NotifyDialog(parse(action, payload)?),
            "tts" => Self::Tts(parse(action, payload)?),
            "share_text" => Self::ShareText(parse(action, payload)?),
            "share_file" => Self::ShareFile(parse(action, payload)?),
            "send_png" => Self::SendPng(parse(action, payload)?),
            "render_html" => Self::RenderHtml(parse(action, payload)?),
            "device_info" => Self::DeviceInfo,
            "recent_messages" => Self::RecentMessages(parse(action, payload)?),
            "data_write" => Self::DataWrite(parse(action, payload)?),
            "data_read" => Self::DataRead(parse(action, payload)?),
            "data_list" => Self::DataList,
            "data_delete" => Self::DataDelete,
            "kv_set" => Self::KvSet(parse(action, payload)?),
            "kv_get" => Self::KvGet(parse(action, payload)?),
            "kv_get_int" => Self::KvGetInt(parse(action, payload)?),
            "kv_delete_prefix" => Self::KvDeletePrefix(parse(action, payload)?),
            "pip_install" => Self::PipInstall(parse(action, payload)?),
            "exec" => Self::Exec(parse(action, payload)?),
            _ => Self::Other {
                action: action.to_string(),
                payload,
            },
        };
        Ok(kind)
    }
}
