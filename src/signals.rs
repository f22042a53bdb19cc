//! Inbound platform signals and candidate events
//!
//! The host platform's callbacks (call-state broadcast, notification listener,
//! call-log observer) are reified as JSON-line records appended to a spool
//! file by the `signal` subcommand and drained by the daemon each poll tick.

use crate::call_state::PhoneState;
use crate::config::Config;
use crate::error::Result;
use crate::journal::CallerId;
use crate::lock::FileLock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// One inbound signal from a platform collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// Call-state-changed broadcast with optional caller number.
    CallState {
        state: PhoneState,
        number: Option<String>,
    },
    /// Third-party notification posting (title/body plus source package).
    NotificationPosted {
        package: String,
        title: String,
        text: String,
    },
    /// Call-log change marker; carries no data, triggers a re-query.
    CallLogChanged,
}

/// An unconfirmed, not-yet-deduplicated missed-call signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMissedCall {
    pub caller: CallerId,
    pub event_time: DateTime<Utc>,
}

/// Spool file connecting signal producers to the daemon.
pub struct SignalSpool {
    path: PathBuf,
}

impl SignalSpool {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.signal_spool.clone(),
        }
    }

    /// Append one signal as a JSON line. Pushers run in CLI processes, so the
    /// write holds the spool's file lock against a concurrent drain.
    pub fn push(&self, signal: &Signal) -> Result<()> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(signal)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Drain all pending signals in arrival order and truncate the spool.
    /// The file lock spans the read and the truncate, so a push cannot land
    /// in between and be destroyed. Malformed lines are skipped with a log
    /// line, not fatal.
    pub fn drain(&self) -> Result<Vec<Signal>> {
        let _lock = FileLock::acquire(&self.path)?;
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if content.is_empty() {
            return Ok(Vec::new());
        }
        fs::write(&self.path, "")?;

        let mut signals = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Signal>(line) {
                Ok(signal) => signals.push(signal),
                Err(e) => warn!("Skipping malformed signal line: {}", e),
            }
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spool(temp_dir: &TempDir) -> SignalSpool {
        SignalSpool::new(&Config::for_test(temp_dir.path()))
    }

    #[test]
    fn test_drain_empty_spool() {
        let temp_dir = TempDir::new().unwrap();
        assert!(spool(&temp_dir).drain().unwrap().is_empty());
    }

    #[test]
    fn test_push_and_drain_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let s = spool(&temp_dir);

        s.push(&Signal::CallState {
            state: PhoneState::Ringing,
            number: Some("+16175551234".to_string()),
        })
        .unwrap();
        s.push(&Signal::CallState {
            state: PhoneState::Idle,
            number: None,
        })
        .unwrap();
        s.push(&Signal::CallLogChanged).unwrap();

        let drained = s.drain().unwrap();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0], Signal::CallState { state: PhoneState::Ringing, .. }));
        assert_eq!(drained[2], Signal::CallLogChanged);

        // Spool is consumed
        assert!(s.drain().unwrap().is_empty());
    }

    #[test]
    fn test_notification_signal_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let s = spool(&temp_dir);

        let signal = Signal::NotificationPosted {
            package: "com.whatsapp".to_string(),
            title: "WhatsApp".to_string(),
            text: "Missed voice call".to_string(),
        };
        s.push(&signal).unwrap();

        assert_eq!(s.drain().unwrap(), vec![signal]);
    }

    #[test]
    fn test_concurrent_push_and_drain_loses_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::for_test(temp_dir.path());

        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let mut producers = Vec::new();
        for _ in 0..PRODUCERS {
            let config = config.clone();
            producers.push(std::thread::spawn(move || {
                let s = SignalSpool::new(&config);
                for _ in 0..PER_PRODUCER {
                    s.push(&Signal::CallLogChanged).unwrap();
                }
            }));
        }

        // Drain continuously while producers are still pushing; every pushed
        // signal must come out exactly once.
        let s = SignalSpool::new(&config);
        let mut drained = 0;
        while producers.iter().any(|p| !p.is_finished()) {
            drained += s.drain().unwrap().len();
        }
        for p in producers {
            p.join().unwrap();
        }
        drained += s.drain().unwrap().len();

        assert_eq!(drained, PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::for_test(temp_dir.path());
        let s = SignalSpool::new(&config);

        s.push(&Signal::CallLogChanged).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&config.signal_spool)
            .unwrap();
        writeln!(file, "not json").unwrap();
        s.push(&Signal::CallLogChanged).unwrap();

        assert_eq!(s.drain().unwrap().len(), 2);
    }
}
