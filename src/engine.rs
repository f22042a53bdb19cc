//! Detection engine
//!
//! One serialized consumer for the three detection paths (call-state
//! broadcast, chat-app notification, call-log observer). Producers feed
//! [`Signal`]s through a channel; the engine owns the correlator, journal,
//! and dispatcher, so candidate handling is ordered and the paths cannot
//! race each other past the dedup gate.

use crate::call_log::CallLogReader;
use crate::call_state::{CallStateCorrelator, Transition};
use crate::config::{
    Config, ReplySettings, CALL_LOG_WINDOW_MS, CHAT_NOTIFICATION_WINDOW_MS, MISSED_CALL_WINDOW_MS,
};
use crate::dedup::CallerClaims;
use crate::dispatch::{DispatchOutcome, Dispatcher, ReplySender};
use crate::error::Error;
use crate::journal::ReplyJournal;
use crate::notifications;
use crate::signals::{CandidateMissedCall, Signal};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::{error, info, warn};

/// User-visible notices (blocked spam, handling-call indication).
pub trait AlertSink {
    fn post(&self, title: &str, text: &str);
}

/// Production sink shelling out to the desktop notifier. Failures are
/// log-only; a notice is never worth failing a detection path over.
pub struct CommandAlerts {
    notify_send: PathBuf,
}

impl CommandAlerts {
    pub fn new(config: &Config) -> Self {
        Self {
            notify_send: config.notify_send.clone(),
        }
    }
}

impl AlertSink for CommandAlerts {
    fn post(&self, title: &str, text: &str) {
        match Command::new(&self.notify_send).args([title, text]).output() {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!("Notifier exited with {}", output.status),
            Err(e) => warn!("Failed to post notice: {}", e),
        }
    }
}

/// The serialized signal consumer.
pub struct Engine<S: ReplySender, A: AlertSink> {
    config: Config,
    correlator: CallStateCorrelator,
    call_log: CallLogReader,
    dispatcher: Dispatcher<S>,
    alerts: A,
}

impl<S: ReplySender, A: AlertSink> Engine<S, A> {
    pub fn new(config: &Config, journal: Arc<ReplyJournal>, sender: S, alerts: A) -> Self {
        Self {
            correlator: CallStateCorrelator::new(),
            call_log: CallLogReader::new(config),
            dispatcher: Dispatcher::new(journal, CallerClaims::new(), sender),
            alerts,
            config: config.clone(),
        }
    }

    /// Handle one inbound signal. Failures are contained here; nothing
    /// propagates far enough to stop the consuming loop.
    pub fn handle_signal(&self, signal: Signal, now: DateTime<Utc>) {
        match signal {
            Signal::CallState { state, number } => {
                match self.correlator.on_state_changed(state, number.as_deref(), now) {
                    Transition::SpamBlocked(n) => {
                        self.alerts
                            .post("Blocked Spam Call", &format!("Call from {} blocked as spam", n));
                    }
                    Transition::HandlingCall(n) => {
                        self.alerts
                            .post("Handling Call", &format!("Incoming call from {}", n));
                    }
                    Transition::MissedCall(candidate) => {
                        self.try_dispatch(&candidate, MISSED_CALL_WINDOW_MS, now);
                    }
                    Transition::RingingUnknown | Transition::Answered | Transition::Nothing => {}
                }
            }

            Signal::NotificationPosted { package, title, text } => {
                if let Some(candidate) = notifications::classify(&package, &title, &text, now) {
                    self.try_dispatch(&candidate, CHAT_NOTIFICATION_WINDOW_MS, now);
                }
            }

            Signal::CallLogChanged => {
                info!("Checking call log for recent missed calls");
                match self.call_log.recent_missed_call(now, CALL_LOG_WINDOW_MS) {
                    Ok(Some(candidate)) => {
                        self.try_dispatch(&candidate, CALL_LOG_WINDOW_MS, now);
                    }
                    Ok(None) => {}
                    Err(Error::PermissionDenied(msg)) => {
                        // Missing capability aborts this check silently
                        // beyond the log line.
                        warn!("{}", msg);
                    }
                    Err(e) => warn!("Failed to check call log: {}", e),
                }
            }
        }
    }

    fn try_dispatch(&self, candidate: &CandidateMissedCall, window_ms: i64, now: DateTime<Utc>) {
        // Settings are re-read per dispatch so edits apply without a restart,
        // matching how the legacy app read preferences at send time.
        let settings = ReplySettings::load(&self.config);

        match self.dispatcher.dispatch(candidate, &settings, window_ms, now) {
            Ok(DispatchOutcome::Sent) => {}
            Ok(outcome) => info!("Candidate for {} skipped: {:?}", candidate.caller.identifier, outcome),
            // Reported once; never journaled, never retried.
            Err(e) => error!("Failed to send auto-reply to {}: {}", candidate.caller.identifier, e),
        }
    }
}
