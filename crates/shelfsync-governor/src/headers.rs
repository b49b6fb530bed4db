//! Interpretation of rate-limit response headers
//!
//! Reads `Retry-After`, the standard `RateLimit-Limit/Remaining/Reset` headers
//! and their legacy `X-RateLimit-*` counterparts, and turns them into an
//! [`Adjustment`] for the governor. Lookup goes through [`HeaderMap`], so
//! header names are case-insensitive.
//!
//! Malformed or missing headers never produce an error: the offending signal
//! is skipped and whatever else is usable still applies.

use std::time::Duration;

use chrono::Utc;
use reqwest::{header::HeaderMap, StatusCode};
use tracing::{debug, warn};

use crate::{backoff::scale, retry_after::parse_retry_after};

/// Below this percentage of remaining quota the governor starts backing off
pub const LOW_QUOTA_PERCENT: f64 = 20.0;

/// Multiplier on the time left until reset when the quota is exhausted
pub const EXHAUSTED_RESET_SAFETY: f64 = 1.2;

/// Fraction of the time left until reset used as a preemptive rate floor
pub const PREEMPTIVE_RESET_FRACTION: f64 = 0.8;

/// Reset values below this are delta-seconds, not Unix timestamps
/// (2001-09-09, well before any real reset timestamp).
const UNIX_TIMESTAMP_THRESHOLD: u64 = 1_000_000_000;

const RETRY_AFTER: &str = "retry-after";

/// Header names of one quota header family.
struct QuotaHeaders {
    limit: &'static str,
    remaining: &'static str,
    reset: &'static str,
}

/// Standard family first, legacy `X-` names second.
const QUOTA_FAMILIES: [QuotaHeaders; 2] = [
    QuotaHeaders {
        limit: "ratelimit-limit",
        remaining: "ratelimit-remaining",
        reset: "ratelimit-reset",
    },
    QuotaHeaders {
        limit: "x-ratelimit-limit",
        remaining: "x-ratelimit-remaining",
        reset: "x-ratelimit-reset",
    },
];

/// Quota values taken from a single header family.
#[derive(Debug, Default)]
struct Quota {
    limit: Option<u64>,
    remaining: Option<u64>,
    reset: Option<Duration>,
}

/// Where a backoff hint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintSource {
    /// An explicit `Retry-After` header
    RetryAfter,
    /// Remaining quota was low or exhausted
    Quota,
    /// A 429 status with no usable headers
    Status,
}

/// Delay to feed into the backoff controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffHint {
    /// Suggested delay; zero means "back off from the current rate"
    pub delay: Duration,
    pub source: HintSource,
}

/// What a response asks the governor to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adjustment {
    /// Apply a backoff with this hint
    pub backoff: Option<BackoffHint>,
    /// Time until the quota resets; slow down preemptively (no backoff window)
    pub ensure_rate_under: Option<Duration>,
}

impl Adjustment {
    pub fn is_empty(&self) -> bool {
        self.backoff.is_none() && self.ensure_rate_under.is_none()
    }
}

/// Decides how a response should adjust pacing.
///
/// Priority:
/// 1. A positive `Retry-After` wins outright; nothing else is considered.
/// 2. Quota headers: `remaining <= 1` backs off aggressively (from the reset
///    time when known, otherwise twice the current rate); otherwise a
///    remaining share below [`LOW_QUOTA_PERCENT`] backs off in proportion to
///    how close the quota is to exhaustion.
/// 3. A `429` without any of the above still backs off from the current rate.
/// 4. Independently, a reset time in the future becomes a preemptive rate floor.
pub fn interpret(status: StatusCode, headers: &HeaderMap, current_rate: Duration) -> Adjustment {
    if let Some(delay) = retry_after(headers) {
        return Adjustment {
            backoff: Some(BackoffHint {
                delay,
                source: HintSource::RetryAfter,
            }),
            ensure_rate_under: None,
        };
    }

    let Quota {
        limit,
        remaining,
        reset,
    } = quota(headers);

    let mut adjustment = Adjustment {
        backoff: remaining.and_then(|remaining| quota_backoff(remaining, limit, reset, current_rate)),
        ensure_rate_under: reset,
    };

    if adjustment.backoff.is_none() && status == StatusCode::TOO_MANY_REQUESTS {
        debug!("429 without usable rate-limit headers");
        adjustment.backoff = Some(BackoffHint {
            delay: Duration::ZERO,
            source: HintSource::Status,
        });
    }

    adjustment
}

fn quota_backoff(
    remaining: u64,
    limit: Option<u64>,
    reset: Option<Duration>,
    current_rate: Duration,
) -> Option<BackoffHint> {
    if remaining <= 1 {
        let delay = match reset {
            Some(reset) => scale(reset, EXHAUSTED_RESET_SAFETY),
            None => scale(current_rate, 2.0),
        };
        debug!(remaining, delay_ms = delay.as_millis() as u64, "Rate-limit quota exhausted");
        return Some(BackoffHint {
            delay,
            source: HintSource::Quota,
        });
    }

    let limit = limit.filter(|limit| *limit > 0)?;
    let remaining_pct = remaining as f64 / limit as f64 * 100.0;
    if remaining_pct >= LOW_QUOTA_PERCENT {
        return None;
    }

    let delay = scale(current_rate, 1.0 + (100.0 - remaining_pct) / 10.0);
    debug!(
        remaining,
        limit,
        remaining_pct,
        delay_ms = delay.as_millis() as u64,
        "Rate-limit quota running low"
    );
    Some(BackoffHint {
        delay,
        source: HintSource::Quota,
    })
}

/// A positive `Retry-After` delay, if one is present and parses.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = header_str(headers, RETRY_AFTER)?;
    match parse_retry_after(raw) {
        Ok(delay) if !delay.is_zero() => Some(delay),
        Ok(_) => None,
        Err(err) => {
            warn!(value = raw, error = %err, "Ignoring unusable Retry-After header");
            None
        }
    }
}

/// Reads limit, remaining and reset from the first family whose `remaining`
/// parses, so values from different families are never mixed. Without a
/// usable `remaining` only a reset time is taken.
fn quota(headers: &HeaderMap) -> Quota {
    for family in &QUOTA_FAMILIES {
        if let Some(remaining) = parse_u64(headers, family.remaining) {
            return Quota {
                limit: parse_u64(headers, family.limit),
                remaining: Some(remaining),
                reset: reset_in(headers, family.reset),
            };
        }
    }

    Quota {
        reset: QUOTA_FAMILIES
            .iter()
            .find_map(|family| reset_in(headers, family.reset)),
        ..Quota::default()
    }
}

/// Time until the quota resets, if the reset header is present and in the future.
fn reset_in(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let reset = parse_u64(headers, name)?;
    if reset < UNIX_TIMESTAMP_THRESHOLD {
        return Some(Duration::from_secs(reset)).filter(|d| !d.is_zero());
    }

    let now = u64::try_from(Utc::now().timestamp()).ok()?;
    match reset.checked_sub(now) {
        Some(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            debug!(reset, now, "Rate-limit reset is not in the future");
            None
        }
    }
}

fn parse_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = header_str(headers, name)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!(header = name, value = raw, "Ignoring malformed rate-limit header");
            None
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}
