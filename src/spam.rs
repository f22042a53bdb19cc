//! Spam-likeness heuristics for incoming caller identifiers
//!
//! Placeholder heuristics, deliberately conservative: an identifier only
//! classifies as spam-like on a strong signal, since the result gates whether
//! automated handling proceeds at all.

/// Keywords that mark a caller-ID string as spam-like.
const SPAM_KEYWORDS: &[&str] = &["SPAM", "SCAM", "TELEMARKETING"];

/// Classify a raw caller identifier as spam-like. Pure and total.
///
/// True when the identifier contains a spam keyword, or its digit-only form is
/// very short (service codes), or it is a single repeated digit run.
pub fn is_spam_like(identifier: &str) -> bool {
    if identifier.trim().is_empty() {
        return false;
    }

    let upper = identifier.to_uppercase();
    if SPAM_KEYWORDS.iter().any(|kw| upper.contains(kw)) {
        return true;
    }

    let digits: Vec<char> = identifier.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() {
        if digits.len() <= 4 {
            return true;
        }
        // Repeated digits like 0000000 or 1111111
        if digits.len() >= 6 && digits.iter().all(|&c| c == digits[0]) {
            return true;
        }
    }

    false
}

/// Normalize a phone-number string to digits plus an optional leading `+`.
pub fn normalize_number(number: &str) -> String {
    let has_plus = number.starts_with('+');
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if has_plus {
        format!("+{}", digits)
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_digits_are_spam() {
        assert!(is_spam_like("0000000"));
        assert!(is_spam_like("1111111"));
        assert!(is_spam_like("+99 99 99"));
    }

    #[test]
    fn test_short_numbers_are_spam() {
        assert!(is_spam_like("911"));
        assert!(is_spam_like("1234"));
    }

    #[test]
    fn test_normal_numbers_are_not_spam() {
        assert!(!is_spam_like("+14155550123"));
        assert!(!is_spam_like("617-555-1234"));
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert!(is_spam_like("Likely Spam"));
        assert!(is_spam_like("TELEMARKETING CALL"));
        assert!(is_spam_like("scam risk +14155550123"));
    }

    #[test]
    fn test_empty_identifier_is_not_spam() {
        assert!(!is_spam_like(""));
        assert!(!is_spam_like("   "));
    }

    #[test]
    fn test_no_digits_no_keywords_is_not_spam() {
        assert!(!is_spam_like("Alice"));
    }

    #[test]
    fn test_five_repeated_digits_are_short_not_repeated_rule() {
        // Exactly 5 repeated digits: too long for the short rule, too short
        // for the repeat rule.
        assert!(!is_spam_like("55555"));
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("+1 415-555-0100"), "+14155550100");
        assert_eq!(normalize_number("617 555 1234"), "6175551234");
        assert_eq!(normalize_number("+"), "+");
    }
}
