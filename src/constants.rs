//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Application identity shown to the desktop
pub mod app {
    /// Tray title, tooltip and notification grouping name
    pub const DISPLAY_NAME: &str = "Phone Message Receiver";

    /// Notification AppID (fixed for OS-level grouping)
    pub const NOTIFICATION_APP_ID: &str = "Phone Message Receiver";

    /// StatusNotifierItem id
    pub const TRAY_ID: &str = "phone-message-receiver";

    /// Themed icon used when the embedded pixmap can't be decoded
    pub const FALLBACK_ICON_NAME: &str = "mail-message-new";
}

/// File locations
pub mod paths {
    /// Config file name, looked up next to the executable
    pub const CONFIG_FILENAME: &str = "config.yaml";

    /// Log file name, created next to the executable
    pub const LOG_FILENAME: &str = "app.log";

    /// Directory under the user config dir used as a config fallback
    pub const APP_DIR: &str = "phone-message-receiver";
}

/// MQTT transport constants
pub mod mqtt {
    use std::time::Duration;

    /// Port used when the broker URI omits one
    pub const DEFAULT_PORT: u16 = 1883;

    /// Keep-alive interval sent in CONNECT
    pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

    /// Capacity of the client request channel
    pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

    /// Largest incoming/outgoing packet accepted (bytes)
    pub const MAX_PACKET_SIZE: usize = 256 * 1024;

    /// First wait after a mid-session connection error
    pub const RECONNECT_DELAY_INITIAL: Duration = Duration::from_secs(1);

    /// Upper bound for the reconnect wait
    pub const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);

    /// Granularity at which a reconnect wait checks for cancellation
    pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// URI schemes that require TLS or websockets (unsupported)
    pub const UNSUPPORTED_SCHEMES: &[&str] = &["ssl", "tls", "mqtts", "ws", "wss"];

    /// URI schemes meaning plain TCP
    pub const TCP_SCHEMES: &[&str] = &["tcp", "mqtt"];
}

/// Client identifier generation
pub mod identity {
    /// Random bytes drawn per process (hex-encoded to twice this length)
    pub const CLIENT_ID_BYTES: usize = 10;
}

/// Notification text templates
pub mod notification {
    pub const TITLE_PREFIX: &str = "From: ";
    pub const CODE_PREFIX: &str = "Code: ";
    pub const SENDER_PREFIX: &str = "Sender: ";
    pub const CONTENT_PREFIX: &str = "Content: ";
}
