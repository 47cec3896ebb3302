//! Payload decoding and the rep counter parsing rule.
//!
//! Sensors report their counter in one of two wire formats: ASCII text
//! (`"REPS:12"`, `"12"`, `"count=12 ok"`), or a raw little-endian integer of
//! up to four bytes on early firmware. [`decode_payload`] turns either form
//! into text so a single rule, [`parse_rep_count`], applies to everything the
//! decoder sees.

use crate::error::{ParseError, ParseResult};

/// Label that marks the counter inside a text frame.
const REPS_LABEL: &str = "REPS";

/// Decode a raw characteristic payload into text.
///
/// A payload of one to four bytes with no ASCII digits and at least one
/// non-printable byte is a binary counter and is rendered in decimal.
/// Everything else is treated as (possibly noisy) UTF-8 text with NULs and
/// surrounding whitespace removed.
///
/// # Examples
///
/// ```
/// use setsense_types::decode_payload;
///
/// assert_eq!(decode_payload(b"REPS:3\0\0"), "REPS:3");
/// assert_eq!(decode_payload(&[0x0C]), "12");
/// assert_eq!(decode_payload(&[0x2C, 0x01]), "300");
/// ```
pub fn decode_payload(payload: &[u8]) -> String {
    if is_binary_counter(payload) {
        let mut buf = [0u8; 4];
        buf[..payload.len()].copy_from_slice(payload);
        return u32::from_le_bytes(buf).to_string();
    }

    String::from_utf8_lossy(payload)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn is_binary_counter(payload: &[u8]) -> bool {
    (1..=4).contains(&payload.len())
        && !payload.iter().any(u8::is_ascii_digit)
        && payload.iter().any(|b| !(b.is_ascii_graphic() || *b == b' '))
}

/// Extract the rep counter from decoded payload text.
///
/// Rules, in order:
/// 1. `REPS` (any case) followed by optional `:`, `=` or whitespace and a
///    decimal integer. The first labelled value wins.
/// 2. Otherwise the first run of decimal digits anywhere in the text.
/// 3. Otherwise [`ParseError::NoDigits`].
///
/// # Examples
///
/// ```
/// use setsense_types::{parse_rep_count, ParseError};
///
/// assert_eq!(parse_rep_count("REPS:4"), Ok(4));
/// assert_eq!(parse_rep_count("bat 80 reps=5"), Ok(5));
/// assert_eq!(parse_rep_count("tick 9"), Ok(9));
/// assert_eq!(parse_rep_count("xyz"), Err(ParseError::NoDigits));
/// ```
pub fn parse_rep_count(text: &str) -> ParseResult<u32> {
    if let Some(value) = labelled_value(text) {
        return value;
    }

    match first_digit_run(text) {
        Some(digits) => parse_digits(digits),
        None => Err(ParseError::NoDigits),
    }
}

fn labelled_value(text: &str) -> Option<ParseResult<u32>> {
    // ASCII uppercasing keeps byte offsets identical to `text`.
    let upper = text.to_ascii_uppercase();
    let mut from = 0;

    while let Some(pos) = upper[from..].find(REPS_LABEL) {
        let after = from + pos + REPS_LABEL.len();
        let rest = text[after..].trim_start_matches(|c: char| c == ':' || c == '=' || c.is_whitespace());
        let digits = leading_digits(rest);
        if !digits.is_empty() {
            return Some(parse_digits(digits));
        }
        from = after;
    }

    None
}

fn first_digit_run(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    Some(leading_digits(&text[start..]))
}

fn leading_digits(text: &str) -> &str {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    &text[..end]
}

fn parse_digits(digits: &str) -> ParseResult<u32> {
    digits
        .parse::<u32>()
        .map_err(|_| ParseError::Overflow(digits.to_string()))
}
