//! Dedup window policy
//!
//! Decides whether an auto-reply was already sent to a caller inside a time
//! window, so overlapping detection paths (broadcast, call-log observer, chat
//! notification) cannot double-send. The policy is window-agnostic; each
//! trigger source supplies its own window constant.

use crate::journal::ReplyJournal;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// True iff no reply to `contact` (the tagged storage string, matched exactly)
/// is journaled inside the inclusive window `[event_time - window, event_time]`.
///
/// Read-only: calling it twice without an intervening append returns the same
/// answer. It does not by itself close the check-then-send race; hold a
/// [`CallerClaim`] across the check→send→append sequence for that.
pub fn should_reply(
    journal: &ReplyJournal,
    contact: &str,
    event_time: DateTime<Utc>,
    window_ms: i64,
) -> bool {
    let start = event_time - Duration::milliseconds(window_ms);
    !journal
        .filter(None, Some(start), Some(event_time))
        .iter()
        .any(|e| e.contact() == contact)
}

/// Per-caller in-flight claims.
///
/// A claim is held from the dedup check through the post-send journal append,
/// making that sequence effectively atomic per caller identifier. A concurrent
/// trigger for the same caller fails to claim and is skipped, not queued.
#[derive(Clone, Default)]
pub struct CallerClaims {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl CallerClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a caller identifier. Returns `None` while another claim for the
    /// same identifier is live.
    pub fn try_claim(&self, identifier: &str) -> Option<CallerClaim> {
        let mut held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(identifier.to_string()) {
            return None;
        }
        Some(CallerClaim {
            identifier: identifier.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

/// RAII guard releasing the claim on drop.
pub struct CallerClaim {
    identifier: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for CallerClaim {
    fn drop(&mut self) {
        let mut held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::journal::{CallerId, LogEntry};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_empty_journal_allows_reply() {
        let temp_dir = TempDir::new().unwrap();
        let journal = ReplyJournal::new(&Config::for_test(temp_dir.path()));

        assert!(should_reply(&journal, "+1555", at(1000), 5000));
    }

    #[test]
    fn test_idempotent_without_append() {
        let temp_dir = TempDir::new().unwrap();
        let journal = ReplyJournal::new(&Config::for_test(temp_dir.path()));

        let first = should_reply(&journal, "+1555", at(1000), 5000);
        let second = should_reply(&journal, "+1555", at(1000), 5000);
        assert_eq!(first, second);
    }

    #[test]
    fn test_suppressed_inside_window_allowed_outside() {
        let temp_dir = TempDir::new().unwrap();
        let journal = ReplyJournal::new(&Config::for_test(temp_dir.path()));

        let sent_at = at(10_000);
        journal
            .append(&LogEntry::new(CallerId::pstn("+1555"), sent_at))
            .unwrap();

        let window_ms = 5000;
        // Any event time within the window of the recorded send is suppressed
        assert!(!should_reply(&journal, "+1555", at(10_000), window_ms));
        assert!(!should_reply(&journal, "+1555", at(10_003), window_ms));
        assert!(!should_reply(&journal, "+1555", at(10_005), window_ms)); // inclusive boundary
        // Outside the window the reply is allowed again
        assert!(should_reply(&journal, "+1555", at(10_006), window_ms));
        // An event before the send is also unaffected by it
        assert!(should_reply(&journal, "+1555", at(9_999), window_ms));
    }

    #[test]
    fn test_exact_contact_match_not_substring() {
        let temp_dir = TempDir::new().unwrap();
        let journal = ReplyJournal::new(&Config::for_test(temp_dir.path()));

        journal
            .append(&LogEntry::new(CallerId::pstn("+15551234"), at(1000)))
            .unwrap();

        // A prefix of a journaled contact is a different caller
        assert!(should_reply(&journal, "+1555", at(1001), 5000));
        assert!(!should_reply(&journal, "+15551234", at(1001), 5000));
    }

    #[test]
    fn test_sources_dedup_independently() {
        let temp_dir = TempDir::new().unwrap();
        let journal = ReplyJournal::new(&Config::for_test(temp_dir.path()));

        journal
            .append(&LogEntry::new(CallerId::chat_app("+1555"), at(1000)))
            .unwrap();

        // The tagged storage strings differ, so the PSTN path is not blocked
        // by a chat-app reply
        assert!(should_reply(&journal, "+1555", at(1001), 5000));
        assert!(!should_reply(&journal, "W:+1555", at(1001), 5000));
    }

    #[test]
    fn test_claim_excludes_same_identifier() {
        let claims = CallerClaims::new();

        let held = claims.try_claim("+1555");
        assert!(held.is_some());
        assert!(claims.try_claim("+1555").is_none());

        drop(held);
        assert!(claims.try_claim("+1555").is_some());
    }

    #[test]
    fn test_claims_independent_per_identifier() {
        let claims = CallerClaims::new();

        let _a = claims.try_claim("+1555").unwrap();
        assert!(claims.try_claim("+1666").is_some());
    }

    #[test]
    fn test_claims_shared_across_clones() {
        let claims = CallerClaims::new();
        let other = claims.clone();

        let _held = claims.try_claim("+1555").unwrap();
        assert!(other.try_claim("+1555").is_none());
    }
}
