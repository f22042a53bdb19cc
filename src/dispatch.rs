//! Reply dispatch
//!
//! Takes an approved candidate event and sends the auto-reply: SMS for PSTN
//! callers, a deep-linked chat compose action for chat-app callers. A journal
//! entry is appended only after a successful send; a failed send is reported
//! once and never recorded or retried.

use crate::config::ReplySettings;
use crate::dedup::{self, CallerClaims};
use crate::error::{Error, Result};
use crate::journal::{CallerSource, LogEntry, ReplyJournal};
use crate::signals::CandidateMissedCall;
use crate::spam;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

/// Outbound send collaborators (platform glue behind one seam).
pub trait ReplySender {
    fn send_sms(&self, number: &str, text: &str) -> Result<()>;
    fn open_chat_compose(&self, number: &str, text: &str) -> Result<()>;
}

/// Production sender shelling out to the configured CLIs.
pub struct CommandSender {
    send_sms: PathBuf,
    open_url: PathBuf,
}

impl CommandSender {
    pub fn new(config: &crate::config::Config) -> Self {
        Self {
            send_sms: config.send_sms.clone(),
            open_url: config.open_url.clone(),
        }
    }

    fn run(program: &PathBuf, args: &[&str]) -> Result<()> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Dispatch(format!("{}: {}", program.display(), e)))?;

        if !output.status.success() {
            return Err(Error::Dispatch(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

impl ReplySender for CommandSender {
    fn send_sms(&self, number: &str, text: &str) -> Result<()> {
        Self::run(&self.send_sms, &[number, text])
    }

    fn open_chat_compose(&self, number: &str, text: &str) -> Result<()> {
        let url = compose_deep_link(number, text);
        Self::run(&self.open_url, &[&url])
    }
}

/// Build the chat-app compose deep link for a caller.
pub fn compose_deep_link(number: &str, text: &str) -> String {
    let normalized = spam::normalize_number(number);
    format!(
        "https://wa.me/{}?text={}",
        percent_encode(&normalized),
        percent_encode(text)
    )
}

/// Minimal RFC 3986 percent-encoding (unreserved characters kept).
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Why a candidate did or did not produce a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Empty identifier: nothing to address a reply to.
    SkippedUnknownCaller,
    /// A reply inside the dedup window is already journaled.
    SkippedDuplicate,
    /// Another detection path is mid-dispatch for the same caller.
    SkippedInFlight,
}

/// Serialized reply dispatcher owning the dedup gate.
pub struct Dispatcher<S: ReplySender> {
    journal: Arc<ReplyJournal>,
    claims: CallerClaims,
    sender: S,
}

impl<S: ReplySender> Dispatcher<S> {
    pub fn new(journal: Arc<ReplyJournal>, claims: CallerClaims, sender: S) -> Self {
        Self {
            journal,
            claims,
            sender,
        }
    }

    /// Run the dedup-check -> send -> journal-append sequence for one
    /// candidate. The per-caller claim is held across the whole sequence.
    pub fn dispatch(
        &self,
        candidate: &CandidateMissedCall,
        settings: &ReplySettings,
        window_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        if candidate.caller.is_unknown() {
            warn!("No caller identifier, skipping auto-reply");
            return Ok(DispatchOutcome::SkippedUnknownCaller);
        }

        let contact = candidate.caller.to_tagged();

        let _claim = match self.claims.try_claim(&contact) {
            Some(claim) => claim,
            None => {
                info!("Dispatch already in flight for {}, skipping", contact);
                return Ok(DispatchOutcome::SkippedInFlight);
            }
        };

        if !dedup::should_reply(&self.journal, &contact, candidate.event_time, window_ms) {
            info!("Auto-reply already sent recently to {}", contact);
            return Ok(DispatchOutcome::SkippedDuplicate);
        }

        if settings.whitelist_only {
            // TODO: enforce whitelist_only before sending. The flag is stored
            // and surfaced in settings but replies currently go out to all
            // missed callers, matching the observed legacy behavior.
            warn!("whitelist_only is set but not enforced; replying anyway");
        }

        match candidate.caller.source {
            CallerSource::Pstn => {
                self.sender
                    .send_sms(&candidate.caller.identifier, &settings.auto_reply_text)?;
                info!("Sent auto-reply SMS to {}", candidate.caller.identifier);
            }
            CallerSource::ChatApp => {
                self.sender
                    .open_chat_compose(&candidate.caller.identifier, &settings.auto_reply_text)?;
                info!(
                    "Opened chat compose for {}",
                    candidate.caller.identifier
                );
            }
        }

        // Append after the send only. A failed append leaves the reply
        // sent-but-unlogged for this run; the send is not rolled back.
        let entry = LogEntry::new(candidate.caller.clone(), now);
        if let Err(e) = self.journal.append(&entry) {
            warn!("Failed to journal sent reply: {}", e);
        }

        Ok(DispatchOutcome::Sent)
    }
}
