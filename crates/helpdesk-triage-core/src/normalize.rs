//! Text normalization and content signatures.
//!
//! Every ticket is reduced to a canonical text form before hashing or
//! embedding, so trivially different inputs (case, punctuation, spacing)
//! collapse to the same signature.
//!
//! # Normalization Rules
//!
//! 1. Concatenate `subject`, a single space, and `description`.
//! 2. Lowercase.
//! 3. Replace every character that is not an ASCII letter, ASCII digit,
//!    underscore or whitespace with a space.
//! 4. Collapse whitespace runs into one space and trim both ends.
//!
//! The result is idempotent: normalizing an already-normalized string
//! returns it unchanged.

use sha2::{Digest, Sha256};

/// Normalize a subject/description pair into canonical form.
///
/// ```rust
/// use helpdesk_triage_core::normalize::normalize_text;
///
/// assert_eq!(normalize_text("Wi-Fi DOWN!!", "  at site 7 "), "wi fi down at site 7");
/// assert_eq!(normalize_text("", ""), "");
/// ```
pub fn normalize_text(subject: &str, description: &str) -> String {
    let joined = format!("{} {}", subject, description).to_lowercase();
    let replaced: String = joined
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase hex SHA-256 of the UTF-8 bytes of `normalized`.
pub fn signature_of(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_and_case_collapse() {
        let a = normalize_text("Printer  JAMMED!", "tray #2, again.");
        let b = normalize_text("printer jammed", "tray 2 again");
        assert_eq!(a, "printer jammed tray 2 again");
        assert_eq!(a, b);
        assert_eq!(signature_of(&a), signature_of(&b));
    }

    #[test]
    fn test_idempotent() {
        let once = normalize_text("  VPN\tdrops ~ every 5 min ", "\n(since update)");
        assert_eq!(normalize_text(&once, ""), once);
    }

    #[test]
    fn test_empty_description() {
        assert_eq!(normalize_text("Hello", ""), "hello");
        assert_eq!(normalize_text("", "World"), "world");
    }

    #[test]
    fn test_underscore_kept_non_ascii_dropped() {
        assert_eq!(normalize_text("err_code", "café"), "err_code caf");
    }

    #[test]
    fn test_signature_known_value() {
        assert_eq!(
            signature_of(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(signature_of("abc").len(), 64);
    }
}
