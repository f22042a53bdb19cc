//! Configuration, paths, and reply settings

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub responder_dir: PathBuf,
    pub state_dir: PathBuf,
    pub journal_file: PathBuf,
    pub settings_file: PathBuf,
    pub signal_spool: PathBuf,
    pub call_log_db: PathBuf,
    pub logs_dir: PathBuf,
    pub send_sms: PathBuf,
    pub open_url: PathBuf,
    pub notify_send: PathBuf,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().expect("Could not find home directory");
        let responder_dir = home.join(".callback-later");

        Self {
            state_dir: responder_dir.join("state"),
            journal_file: responder_dir.join("state/message_log.xml"),
            settings_file: responder_dir.join("state/settings.json"),
            signal_spool: responder_dir.join("state/signals.jsonl"),
            call_log_db: responder_dir.join("calls.db"),
            logs_dir: responder_dir.join("logs"),
            send_sms: home.join("code/sms-cli/send-sms"),
            open_url: PathBuf::from("/usr/bin/xdg-open"),
            notify_send: PathBuf::from("/usr/bin/notify-send"),
            responder_dir,
            home,
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &std::path::Path) -> Self {
        Self {
            home: temp_dir.to_path_buf(),
            responder_dir: temp_dir.join("callback-later"),
            state_dir: temp_dir.join("state"),
            journal_file: temp_dir.join("state/message_log.xml"),
            settings_file: temp_dir.join("state/settings.json"),
            signal_spool: temp_dir.join("state/signals.jsonl"),
            call_log_db: temp_dir.join("calls.db"),
            logs_dir: temp_dir.join("logs"),
            send_sms: temp_dir.join("send-sms"),
            open_url: temp_dir.join("open-url"),
            notify_send: temp_dir.join("notify-send"),
            poll_interval_ms: 100,
        }
    }
}

/// Dedup window for the telephony-broadcast path (ring to idle without answer)
pub const MISSED_CALL_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Dedup window for the call-log observer path (freshness of the newest row)
pub const CALL_LOG_WINDOW_MS: i64 = 3000;

/// Dedup window for the chat-app notification path
pub const CHAT_NOTIFICATION_WINDOW_MS: i64 = 5000;

/// Auto-reply text used whenever no setting has been saved
pub const DEFAULT_AUTO_REPLY: &str = "User is currently unavailable or sleeping. \
For urgent matters, please chat via What's App. Otherwise kindly return call at \
4.00 pm or anytime thereafter.";

/// Reply settings consumed read-only by the detection core.
///
/// Field names mirror the legacy preference keys so an exported settings file
/// stays readable after the rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplySettings {
    #[serde(rename = "auto_reply_msg")]
    pub auto_reply_text: String,
    pub whitelist_only: bool,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            auto_reply_text: DEFAULT_AUTO_REPLY.to_string(),
            whitelist_only: false,
        }
    }
}

impl ReplySettings {
    /// Load settings from disk, falling back to defaults when unset or unreadable.
    pub fn load(config: &Config) -> Self {
        match fs::read_to_string(&config.settings_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Malformed settings file, using defaults: {}", e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to disk.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = config.settings_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&config.settings_file, json)?;
        Ok(())
    }
}
