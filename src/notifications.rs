//! Chat-app notification text extractor
//!
//! Classifies a third-party app's posted notification (title/body) as a missed
//! audio/video call and pulls out a caller identifier. This is best-effort
//! matching against another app's notification copy and is fragile to upstream
//! wording changes, so it lives in this one module with tests pinned to known
//! text samples.

use crate::journal::CallerId;
use crate::signals::CandidateMissedCall;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

/// Source package whose notifications are inspected.
pub const CHAT_APP_PACKAGE: &str = "com.whatsapp";

/// Brand name appearing in the notification title.
const BRAND_NAME: &str = "WhatsApp";

/// Phone-number-shaped token: optional +, a digit, then at least five more
/// digit/space/dash characters, ending in a digit.
static PHONE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\+?\d[\d\s-]{5,}\d)").expect("Invalid phone token regex"));

static PHONE_TOKEN_FULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?\d[\d\s-]{5,}\d$").expect("Invalid phone token regex"));

/// Classify a posted notification. Returns a chat-app candidate event when it
/// represents a missed audio/video call, `None` otherwise.
pub fn classify(
    package: &str,
    title: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Option<CandidateMissedCall> {
    if package != CHAT_APP_PACKAGE {
        return None;
    }

    let body = text.to_lowercase();

    let is_call = title.contains(BRAND_NAME) || body.contains("calling");
    if !is_call {
        return None;
    }

    // "Missed video call from ..." interleaves the call type, so the missed
    // marker is matched on its own and the call-type qualifier supplies the
    // "call" part.
    let is_missed = body.contains("missed");
    let is_audio = body.contains("audio call") || body.contains("voice call");
    let is_video = body.contains("video call");
    if !(is_missed && (is_audio || is_video)) {
        return None;
    }

    let caller = extract_caller(title, text);
    info!("Missed chat-app call detected from: {}", caller);

    Some(CandidateMissedCall {
        caller: CallerId::chat_app(caller),
        event_time: now,
    })
}

/// Pull a caller identifier out of the notification: a phone-shaped token in
/// the body first, then the title, falling back to the raw title text.
fn extract_caller(title: &str, text: &str) -> String {
    if let Some(m) = PHONE_TOKEN.captures(text.trim()).and_then(|c| c.get(1)) {
        return strip_separators(m.as_str());
    }

    let title_trimmed = title.trim();
    if !title_trimmed.is_empty() && PHONE_TOKEN_FULL.is_match(title_trimmed) {
        return strip_separators(title_trimmed);
    }

    title.to_string()
}

fn strip_separators(token: &str) -> String {
    token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::journal::CallerSource;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_missed_video_call_with_number() {
        let candidate = classify(
            "com.whatsapp",
            "WhatsApp",
            "Missed video call from +1 415-555-0100",
            now(),
        )
        .unwrap();

        assert_eq!(candidate.caller.source, CallerSource::ChatApp);
        assert_eq!(candidate.caller.identifier, "+14155550100");
        assert_eq!(candidate.event_time, now());
    }

    #[test]
    fn test_missed_voice_call() {
        let candidate = classify("com.whatsapp", "WhatsApp", "Missed voice call", now());
        assert!(candidate.is_some());
    }

    #[test]
    fn test_missed_audio_call() {
        let candidate = classify("com.whatsapp", "WhatsApp", "1 missed audio call", now());
        assert!(candidate.is_some());
    }

    #[test]
    fn test_no_number_falls_back_to_title() {
        let candidate = classify("com.whatsapp", "WhatsApp", "Missed video call", now()).unwrap();
        assert_eq!(candidate.caller.identifier, "WhatsApp");
    }

    #[test]
    fn test_contact_name_title_falls_back() {
        let candidate =
            classify("com.whatsapp", "WhatsApp", "Alice: missed video call", now()).unwrap();
        // "Alice" is not phone-shaped; raw title is the identifier
        assert_eq!(candidate.caller.identifier, "WhatsApp");
    }

    #[test]
    fn test_number_in_title() {
        let candidate = classify(
            "com.whatsapp",
            "+1 415 555 0100",
            "Missed voice call, calling you back later",
            now(),
        )
        .unwrap();
        assert_eq!(candidate.caller.identifier, "+14155550100");
    }

    #[test]
    fn test_ordinary_message_is_not_a_call() {
        assert!(classify("com.whatsapp", "WhatsApp", "Alice: see you at 5", now()).is_none());
    }

    #[test]
    fn test_missed_call_without_type_is_ignored() {
        // Needs an audio/voice/video qualifier to classify positive
        assert!(classify("com.whatsapp", "WhatsApp", "Missed call", now()).is_none());
    }

    #[test]
    fn test_ongoing_call_is_not_missed() {
        assert!(classify("com.whatsapp", "WhatsApp", "Alice is calling you", now()).is_none());
    }

    #[test]
    fn test_other_package_ignored() {
        assert!(classify(
            "com.example.other",
            "WhatsApp",
            "Missed video call from +1 415-555-0100",
            now()
        )
        .is_none());
    }

    #[test]
    fn test_case_insensitive_body_match() {
        assert!(classify("com.whatsapp", "WhatsApp", "MISSED VIDEO CALL", now()).is_some());
    }

    #[test]
    fn test_calling_body_without_brand_title() {
        let candidate = classify(
            "com.whatsapp",
            "+49 30 901820",
            "Missed video call while calling",
            now(),
        )
        .unwrap();
        assert_eq!(candidate.caller.identifier, "+4930901820");
    }
}
