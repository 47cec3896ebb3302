//! Error types for payload parsing in setsense-types.

use thiserror::Error;

/// Errors produced while extracting a rep counter from a payload.
///
/// These never reach the user. A sample that fails to parse is kept for
/// diagnostics with no counter value attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload text contains no decimal digits.
    #[error("no counter value in payload")]
    NoDigits,

    /// The digit run does not fit a 32-bit counter.
    #[error("counter value out of range: {0}")]
    Overflow(String),
}

/// Result type alias using setsense-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
