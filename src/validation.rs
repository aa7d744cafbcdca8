/// Card form helpers shared by the orchestrator and the tokenizer
///
/// This module provides the pure input handling used before any network call:
/// 1. Display formatting of the card number
/// 2. BIN extraction for network detection
/// 3. Local sanity checks on the card number
/// 4. Payer name splitting for the backend request
use regex::Regex;
use std::sync::LazyLock;

use crate::errors::PaymentError;

/// Number of leading digits that identify the card network.
pub const BIN_LENGTH: usize = 6;

/// Accepted card number lengths (ISO/IEC 7812).
pub const MIN_CARD_DIGITS: usize = 12;
pub const MAX_CARD_DIGITS: usize = 19;

static CARD_DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4,16}").expect("card digit pattern is valid"));

/// Keep ASCII digits only.
pub fn strip_non_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Format a card number for display: `4009175332806176` → `4009 1753 3280 6176`.
///
/// Whitespace and any non-digit characters are dropped first, then the first
/// run of 4 to 16 digits is grouped by four. Input with fewer than four digits
/// comes back as the bare digits. Formatting an already formatted value is a
/// no-op.
pub fn format_card_number(raw: &str) -> String {
    let digits = strip_non_digits(raw);

    let Some(run) = CARD_DIGIT_RUN.find(&digits) else {
        return digits;
    };

    run.as_str()
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First six digits of the card number, once enough digits were typed.
pub fn extract_bin(card_number: &str) -> Option<String> {
    let digits = strip_non_digits(card_number);
    if digits.len() < BIN_LENGTH {
        return None;
    }
    Some(digits[..BIN_LENGTH].to_string())
}

/// Whether `bin` is exactly six ASCII digits.
pub fn is_valid_bin(bin: &str) -> bool {
    bin.len() == BIN_LENGTH && bin.chars().all(|c| c.is_ascii_digit())
}

/// Reject card numbers that cannot possibly tokenize, before calling the provider.
pub fn validate_card_number(card_number: &str) -> Result<(), PaymentError> {
    let digits = strip_non_digits(card_number);

    if !(MIN_CARD_DIGITS..=MAX_CARD_DIGITS).contains(&digits.len()) {
        tracing::warn!(
            "❌ Card number rejected locally: {} digits (expected {}-{})",
            digits.len(),
            MIN_CARD_DIGITS,
            MAX_CARD_DIGITS
        );
        return Err(PaymentError::Validation {
            field: "cardNumber".to_string(),
            message: format!(
                "card number must have between {} and {} digits",
                MIN_CARD_DIGITS, MAX_CARD_DIGITS
            ),
        });
    }

    Ok(())
}

/// Left-pad a single digit month: `"7"` → `"07"`.
pub fn pad_month(month: &str) -> String {
    format!("{:0>2}", month.trim())
}

/// Split a cardholder name into payer first and last name.
///
/// The first word is the first name; the remaining words, joined by single
/// spaces, are the last name, or `"N/A"` when there are none.
pub fn split_cardholder_name(name: &str) -> (String, String) {
    let mut words = name.split_whitespace();
    let first = words.next().unwrap_or_default().to_string();
    let rest = words.collect::<Vec<_>>().join(" ");

    let last = if rest.is_empty() {
        "N/A".to_string()
    } else {
        rest
    };

    (first, last)
}
