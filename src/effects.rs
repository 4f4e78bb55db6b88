//! Desktop side effects: clipboard and notifications
//!
//! Both are process-global OS facilities, so they sit behind the
//! [`DesktopEffects`] capability. The pipeline only sees the trait; the real
//! implementation talks to the clipboard via `arboard` and to the
//! notification daemon via `notify-rust`.

use anyhow::{Context, Result, anyhow};
use std::sync::Mutex;
use tracing::debug;

use crate::constants::app;

/// A desktop notification ready to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub app_id: &'static str,
    pub title: String,
    pub body: String,
}

/// Clipboard + notification capability
///
/// Implementations must be callable from the transport worker thread.
pub trait DesktopEffects: Send + Sync {
    /// Replace the clipboard contents with `text`
    fn set_clipboard(&self, text: &str) -> Result<()>;

    /// Show a desktop notification
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Effects backed by the real desktop session
pub struct SystemEffects {
    /// Kept alive for the whole process: on X11/Wayland the clipboard owner
    /// must outlive the copy or the content disappears
    clipboard: Mutex<Option<arboard::Clipboard>>,
}

impl SystemEffects {
    pub fn new() -> Self {
        Self {
            clipboard: Mutex::new(None),
        }
    }
}

impl Default for SystemEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl DesktopEffects for SystemEffects {
    fn set_clipboard(&self, text: &str) -> Result<()> {
        let mut slot = self
            .clipboard
            .lock()
            .map_err(|_| anyhow!("Clipboard lock poisoned"))?;

        if slot.is_none() {
            *slot = Some(arboard::Clipboard::new().context("Failed to open clipboard")?);
            debug!("Clipboard handle opened");
        }

        let result = match slot.as_mut() {
            Some(clipboard) => clipboard
                .set_text(text.to_owned())
                .context("Failed to write clipboard"),
            None => Err(anyhow!("Clipboard unavailable")),
        };

        // Reopen on the next write rather than reuse a handle that just failed
        if result.is_err() {
            *slot = None;
        }
        result
    }

    fn notify(&self, notification: &Notification) -> Result<()> {
        notify_rust::Notification::new()
            .appname(notification.app_id)
            .summary(&notification.title)
            .body(&notification.body)
            .show()
            .context("Failed to show notification")?;
        Ok(())
    }
}

/// Notification for an envelope carrying a verification code
pub fn code_notification(phone_number: &str, code: &str, sender: &str) -> Notification {
    use crate::constants::notification::*;
    Notification {
        app_id: app::NOTIFICATION_APP_ID,
        title: format!("{TITLE_PREFIX}{phone_number}"),
        body: format!("{CODE_PREFIX}{code}\n{SENDER_PREFIX}{sender}"),
    }
}

/// Notification for a plain SMS
pub fn message_notification(phone_number: &str, content: &str) -> Notification {
    use crate::constants::notification::*;
    Notification {
        app_id: app::NOTIFICATION_APP_ID,
        title: format!("{TITLE_PREFIX}{phone_number}"),
        body: format!("{CONTENT_PREFIX}{content}"),
    }
}
