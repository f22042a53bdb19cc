//! Call-state correlator
//!
//! Tracks ringing -> answered/ended transitions over a single-slot snapshot to
//! decide "was this call missed". Real single-line telephony: one call tracked
//! at a time, a second RINGING silently overwrites the first.

use crate::journal::CallerId;
use crate::signals::CandidateMissedCall;
use crate::spam;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{info, warn};

/// Telephony call states as delivered by the platform broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PhoneState {
    Ringing,
    Offhook,
    Idle,
}

impl FromStr for PhoneState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_uppercase().as_str() {
            "RINGING" => Ok(PhoneState::Ringing),
            "OFFHOOK" => Ok(PhoneState::Offhook),
            "IDLE" => Ok(PhoneState::Idle),
            other => Err(crate::error::Error::Parse(format!(
                "unknown call state: {}",
                other
            ))),
        }
    }
}

/// The single-slot in-flight call record.
#[derive(Debug, Clone)]
struct CallStateSnapshot {
    incoming_number: Option<String>,
    ring_started: DateTime<Utc>,
    answered: bool,
}

/// What a state transition produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Non-spam incoming ring; hand off to the foreground handling collaborator.
    HandlingCall(String),
    /// Spam-like caller blocked at RINGING; post a user-visible notice.
    SpamBlocked(String),
    /// Ring started but the platform supplied no caller number.
    RingingUnknown,
    /// Call answered; nothing to reply to.
    Answered,
    /// Ring ended unanswered: exactly one candidate per tracked call.
    MissedCall(CandidateMissedCall),
    Nothing,
}

/// Correlates call-state broadcasts into missed-call candidates.
pub struct CallStateCorrelator {
    snapshot: Mutex<Option<CallStateSnapshot>>,
}

impl Default for CallStateCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStateCorrelator {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
        }
    }

    /// Feed one call-state-changed event.
    pub fn on_state_changed(
        &self,
        state: PhoneState,
        number: Option<&str>,
        now: DateTime<Utc>,
    ) -> Transition {
        let mut slot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());

        match state {
            PhoneState::Ringing => {
                let number = number.map(str::trim).filter(|n| !n.is_empty());

                if let Some(n) = number {
                    if spam::is_spam_like(n) {
                        // Blocked: nothing stored, so IDLE emits no candidate
                        // for this call.
                        info!("Blocked spam call from: {}", n);
                        *slot = None;
                        return Transition::SpamBlocked(n.to_string());
                    }
                    info!("Incoming call ringing from: {}", n);
                    *slot = Some(CallStateSnapshot {
                        incoming_number: Some(n.to_string()),
                        ring_started: now,
                        answered: false,
                    });
                    Transition::HandlingCall(n.to_string())
                } else {
                    warn!("Incoming number missing at RINGING");
                    *slot = Some(CallStateSnapshot {
                        incoming_number: None,
                        ring_started: now,
                        answered: false,
                    });
                    Transition::RingingUnknown
                }
            }

            PhoneState::Offhook => {
                if let Some(snapshot) = slot.as_mut() {
                    snapshot.answered = true;
                }
                Transition::Answered
            }

            PhoneState::Idle => {
                // Unconditional clear: a duplicate IDLE cannot re-emit.
                let snapshot = slot.take();

                match snapshot {
                    Some(s) if !s.answered => match s.incoming_number {
                        Some(number) => {
                            info!(
                                "Missed call detected from: {} (rang at {})",
                                number, s.ring_started
                            );
                            Transition::MissedCall(CandidateMissedCall {
                                caller: CallerId::pstn(number),
                                event_time: now,
                            })
                        }
                        None => Transition::Nothing,
                    },
                    _ => Transition::Nothing,
                }
            }
        }
    }
}
