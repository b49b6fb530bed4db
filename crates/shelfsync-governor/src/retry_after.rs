//! `Retry-After` header parsing
//!
//! The header is either a delay in seconds (`"120"`) or an HTTP-date
//! (`"Wed, 21 Oct 2026 07:28:00 GMT"`). Parsed delays are padded by
//! [`RETRY_AFTER_BUFFER`] so that requests land safely after the server's
//! window rather than exactly on its edge.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backoff::scale;

/// Padding applied to every parsed delay
pub const RETRY_AFTER_BUFFER: f64 = 1.1;

/// Errors from [`parse_retry_after`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryAfterError {
    /// Neither delay-seconds nor an HTTP-date
    #[error("invalid Retry-After value: {0:?}")]
    InvalidValue(String),

    /// A well-formed HTTP-date that has already passed
    #[error("Retry-After date is in the past: {0}")]
    DateInPast(String),
}

/// Parses a `Retry-After` value and applies the safety buffer.
///
/// An empty value means "no directive" and yields `Duration::ZERO`.
pub fn parse_retry_after(value: &str) -> Result<Duration, RetryAfterError> {
    parse_retry_after_at(value, Utc::now())
}

/// Same as [`parse_retry_after`], with "now" supplied by the caller.
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Result<Duration, RetryAfterError> {
    parse_retry_after_unbuffered(value, now).map(|delay| scale(delay, RETRY_AFTER_BUFFER))
}

/// Parses a `Retry-After` value exactly as sent, without the safety buffer.
pub fn parse_retry_after_unbuffered(
    value: &str,
    now: DateTime<Utc>,
) -> Result<Duration, RetryAfterError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Duration::ZERO);
    }

    // Delay-seconds; anything that does not fit a u32 is not a sane delay
    if let Ok(seconds) = value.parse::<u32>() {
        return Ok(Duration::from_secs(u64::from(seconds)));
    }

    let date = DateTime::parse_from_rfc2822(value)
        .map_err(|_| RetryAfterError::InvalidValue(value.to_string()))?
        .with_timezone(&Utc);

    (date - now)
        .to_std()
        .map_err(|_| RetryAfterError::DateInPast(value.to_string()))
}
