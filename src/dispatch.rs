//! Producer-facing dispatch facade
//!
//! The typed handle producers hold to enqueue actions and collect their
//! results. One constructor per catalogue kind keeps required fields checked
//! at the call site; selector resolution happens once, at enqueue time.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::action::{
    ActionKind, ActionResult, ClipboardSetPayload, DataReadPayload, DataWritePayload,
    DialogPayload, ExecPayload, KvDeletePrefixPayload, KvGetIntPayload, KvGetPayload,
    KvSetPayload, MenuPayload, NotifyDialogPayload, NotifyPayload, OpenEditorPayload,
    OpenUrlPayload, PipInstallPayload, PromptPayload, RecentMessagesPayload, RenderHtmlPayload,
    RipplePayload, SelectChatPayload, SendPngPayload, SheetClosePayload, SheetPayload,
    SheetUpdatePayload, ShareFilePayload, ShareTextPayload, ToastPayload, TtsPayload,
};
use crate::broker::Broker;
use crate::registry::Selector;
use crate::Result;

/// Receipt for an enqueued action
#[derive(Debug, Clone)]
pub struct Ticket {
    /// Device the selector resolved to
    pub device_id: String,
    /// Identifier to wait on or poll for the result
    pub action_id: String,
}

/// Cheap-to-clone producer handle over the broker
#[derive(Debug, Clone)]
pub struct Dispatcher {
    broker: Arc<Broker>,
}

impl Dispatcher {
    /// Create a dispatcher over a shared broker
    #[must_use]
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    fn send(&self, selector: &Selector, kind: &ActionKind) -> Result<Ticket> {
        let (device_id, action_id) = self.broker.enqueue_action(selector, kind, None)?;
        Ok(Ticket {
            device_id,
            action_id,
        })
    }

    /// Enqueue an action by wire name, validating known kinds
    ///
    /// # Errors
    ///
    /// Returns validation or resolution errors; nothing is enqueued on failure
    pub fn send_raw(
        &self,
        selector: &Selector,
        action: &str,
        payload: Value,
        ttl: Option<u64>,
    ) -> Result<Ticket> {
        let kind = ActionKind::from_wire(action, payload)?;
        let (device_id, action_id) = self.broker.enqueue_action(selector, &kind, ttl)?;
        Ok(Ticket {
            device_id,
            action_id,
        })
    }

    /// Suspend until the result for an action arrives, bounded by `timeout`
    ///
    /// A timeout is a normal outcome; the eventual result stays retrievable
    /// through [`Self::get_result`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] when the wait elapses.
    pub async fn wait_result(&self, action_id: &str, timeout: Duration) -> Result<ActionResult> {
        self.broker.results.wait(action_id, timeout).await
    }

    /// Fetch the stored result for an action, optionally consuming it
    #[must_use]
    pub fn get_result(&self, action_id: &str, pop: bool) -> Option<ActionResult> {
        self.broker.results.get(action_id, pop)
    }

    /// Show a transient toast message
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn toast(&self, selector: &Selector, text: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Toast(ToastPayload {
                text: text.to_string(),
            }),
        )
    }

    /// Show a modal dialog; button presses come back as results
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn dialog(
        &self,
        selector: &Selector,
        title: &str,
        text: &str,
        buttons: Option<Vec<String>>,
        callback_id: Option<String>,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Dialog(DialogPayload {
                title: title.to_string(),
                text: text.to_string(),
                buttons: buttons.unwrap_or_else(|| vec!["OK".to_string()]),
                callback_id,
            }),
        )
    }

    /// Show a selection menu
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn menu(
        &self,
        selector: &Selector,
        title: &str,
        message: &str,
        items: Vec<Value>,
        callback_id: Option<String>,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Menu(MenuPayload {
                title: title.to_string(),
                message: message.to_string(),
                items,
                callback_id,
            }),
        )
    }

    /// Ask for free-text input
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn prompt(
        &self,
        selector: &Selector,
        title: &str,
        text: &str,
        hint: &str,
        multiline: bool,
        max_len: u32,
        callback_id: Option<String>,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Prompt(PromptPayload {
                title: title.to_string(),
                text: text.to_string(),
                hint: hint.to_string(),
                multiline,
                max_len,
                callback_id,
            }),
        )
    }

    /// Open a text editor on the device
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn open_editor(
        &self,
        selector: &Selector,
        title: &str,
        content: &str,
        filename: &str,
        readonly: bool,
        callback_id: Option<String>,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::OpenEditor(OpenEditorPayload {
                title: title.to_string(),
                content: content.to_string(),
                filename: filename.to_string(),
                readonly,
                callback_id,
            }),
        )
    }

    /// Open a markup panel
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn sheet(
        &self,
        selector: &Selector,
        dsl: &str,
        actions: Option<Vec<String>>,
        callback_id: Option<String>,
        sheet_id: Option<String>,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Sheet(SheetPayload {
                dsl: dsl.to_string(),
                actions,
                callback_id,
                sheet_id,
            }),
        )
    }

    /// Update an open panel in place
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn sheet_update(
        &self,
        selector: &Selector,
        sheet_id: &str,
        dsl: &str,
        actions: Option<Vec<String>>,
        callback_id: Option<String>,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::SheetUpdate(SheetUpdatePayload {
                sheet_id: sheet_id.to_string(),
                dsl: dsl.to_string(),
                actions,
                callback_id,
            }),
        )
    }

    /// Close an open panel
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn sheet_close(&self, selector: &Selector, sheet_id: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::SheetClose(SheetClosePayload {
                sheet_id: sheet_id.to_string(),
            }),
        )
    }

    /// Ask the user to pick a chat
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn select_chat(
        &self,
        selector: &Selector,
        title: &str,
        callback_id: Option<String>,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::SelectChat(SelectChatPayload {
                title: title.to_string(),
                callback_id,
            }),
        )
    }

    /// Haptic/visual attention effect
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn ripple(&self, selector: &Selector, intensity: f64, vibrate: bool) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Ripple(RipplePayload { intensity, vibrate }),
        )
    }

    /// Open a URL on the device
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn open_url(&self, selector: &Selector, url: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::OpenUrl(OpenUrlPayload {
                url: url.to_string(),
            }),
        )
    }

    /// Replace the device clipboard contents
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn clipboard_set(&self, selector: &Selector, text: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::ClipboardSet(ClipboardSetPayload {
                text: text.to_string(),
            }),
        )
    }

    /// Read the device clipboard; the text comes back as a result
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn clipboard_get(&self, selector: &Selector) -> Result<Ticket> {
        self.send(selector, &ActionKind::ClipboardGet)
    }

    /// Post a system notification
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn notify(&self, selector: &Selector, title: &str, text: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Notify(NotifyPayload {
                title: title.to_string(),
                text: text.to_string(),
            }),
        )
    }

    /// Post a conversation-style notification
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn notify_dialog(
        &self,
        selector: &Selector,
        sender_name: &str,
        message: &str,
        avatar_url: &str,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::NotifyDialog(NotifyDialogPayload {
                sender_name: sender_name.to_string(),
                message: message.to_string(),
                avatar_url: avatar_url.to_string(),
            }),
        )
    }

    /// Speak text aloud
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn tts(&self, selector: &Selector, text: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Tts(TtsPayload {
                text: text.to_string(),
            }),
        )
    }

    /// Open the system share dialog with text
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn share_text(&self, selector: &Selector, text: &str, title: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::ShareText(ShareTextPayload {
                text: text.to_string(),
                title: title.to_string(),
            }),
        )
    }

    /// Open the system share dialog with a file
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn share_file(&self, selector: &Selector, path: &str, title: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::ShareFile(ShareFilePayload {
                path: path.to_string(),
                title: title.to_string(),
            }),
        )
    }

    /// Send an image from a URL
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn send_png(&self, selector: &Selector, url: &str, caption: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::SendPng(SendPngPayload {
                url: url.to_string(),
                caption: caption.to_string(),
            }),
        )
    }

    /// Render HTML to an image on the device
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn render_html(&self, selector: &Selector, payload: RenderHtmlPayload) -> Result<Ticket> {
        self.send(selector, &ActionKind::RenderHtml(payload))
    }

    /// Request a device info snapshot
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn device_info(&self, selector: &Selector) -> Result<Ticket> {
        self.send(selector, &ActionKind::DeviceInfo)
    }

    /// Fetch recent messages from a dialog
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn recent_messages(
        &self,
        selector: &Selector,
        dialog_id: i64,
        limit: u32,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::RecentMessages(RecentMessagesPayload { dialog_id, limit }),
        )
    }

    /// Write a data file on the device
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn data_write(&self, selector: &Selector, filename: &str, data: Value) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::DataWrite(DataWritePayload {
                filename: filename.to_string(),
                data,
            }),
        )
    }

    /// Read a data file from the device
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn data_read(&self, selector: &Selector, filename: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::DataRead(DataReadPayload {
                filename: filename.to_string(),
            }),
        )
    }

    /// List data files on the device
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn data_list(&self, selector: &Selector) -> Result<Ticket> {
        self.send(selector, &ActionKind::DataList)
    }

    /// Delete all data files on the device
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn data_delete(&self, selector: &Selector) -> Result<Ticket> {
        self.send(selector, &ActionKind::DataDelete)
    }

    /// Set a key in the device-side KV store
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn kv_set(
        &self,
        selector: &Selector,
        key: &str,
        value: Value,
        table: &str,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::KvSet(KvSetPayload {
                key: key.to_string(),
                value,
                table: table.to_string(),
            }),
        )
    }

    /// Read a key from the device-side KV store
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn kv_get(&self, selector: &Selector, key: &str, table: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::KvGet(KvGetPayload {
                key: key.to_string(),
                table: table.to_string(),
            }),
        )
    }

    /// Read an integer key from the device-side KV store
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn kv_get_int(
        &self,
        selector: &Selector,
        key: &str,
        default: i64,
        table: &str,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::KvGetInt(KvGetIntPayload {
                key: key.to_string(),
                default,
                table: table.to_string(),
            }),
        )
    }

    /// Delete a key prefix from the device-side KV store
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn kv_delete_prefix(
        &self,
        selector: &Selector,
        prefix: &str,
        table: &str,
    ) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::KvDeletePrefix(KvDeletePrefixPayload {
                prefix: prefix.to_string(),
                table: table.to_string(),
            }),
        )
    }

    /// Install packages on the device runtime
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn pip_install(&self, selector: &Selector, packages: Value) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::PipInstall(PipInstallPayload { packages }),
        )
    }

    /// Execute code on the device runtime
    ///
    /// # Errors
    ///
    /// Returns resolution errors
    pub fn exec(&self, selector: &Selector, code: &str) -> Result<Ticket> {
        self.send(
            selector,
            &ActionKind::Exec(ExecPayload {
                code: code.to_string(),
            }),
        )
    }
}
