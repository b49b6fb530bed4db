//! Backoff controller
//!
//! Turns rate-limit signals into a new (slower) bucket rate and a backoff
//! window during which no request may be admitted.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::settings::{clamp_backoff_factor, clamp_jitter_factor};

/// Safety multiplier applied to server-provided retry delays
pub const RETRY_AFTER_SAFETY: f64 = 1.2;

/// Backoff parameters and the currently active backoff window.
#[derive(Debug, Clone)]
pub struct BackoffController {
    /// Floor for the rate (the configured base rate)
    min_rate: Duration,
    /// Ceiling for the rate
    max_rate: Duration,
    backoff_factor: f64,
    jitter_factor: f64,
    /// Values restored by [`reset`](Self::reset)
    default_backoff_factor: f64,
    default_jitter_factor: f64,
    /// While in the future, every acquisition waits for it to pass
    backoff_until: Option<Instant>,
}

impl BackoffController {
    /// Creates a controller with no active backoff.
    ///
    /// The factors given here also become the values restored on reset.
    pub fn new(min_rate: Duration, max_rate: Duration, backoff_factor: f64, jitter_factor: f64) -> Self {
        let backoff_factor = clamp_backoff_factor(backoff_factor);
        let jitter_factor = clamp_jitter_factor(jitter_factor);
        Self {
            min_rate,
            max_rate: max_rate.max(min_rate),
            backoff_factor,
            jitter_factor,
            default_backoff_factor: backoff_factor,
            default_jitter_factor: jitter_factor,
            backoff_until: None,
        }
    }

    /// Computes the backoff for a rate-limit signal.
    ///
    /// The base is `retry_after` (times [`RETRY_AFTER_SAFETY`]) when it is
    /// positive, otherwise the current rate. The base is multiplied by the
    /// backoff factor, jittered symmetrically and clamped to
    /// `[min_rate, max_rate]`.
    pub fn compute(&self, retry_after: Duration, current_rate: Duration) -> Duration {
        let base = if retry_after.is_zero() {
            current_rate
        } else {
            scale(retry_after, RETRY_AFTER_SAFETY)
        };
        let backoff = jittered(scale(base, self.backoff_factor), self.jitter_factor);
        self.clamp(backoff)
    }

    /// Clamps a duration into `[min_rate, max_rate]`.
    pub fn clamp(&self, value: Duration) -> Duration {
        value.clamp(self.min_rate, self.max_rate)
    }

    /// Opens (or replaces) the backoff window so that it ends at `now + backoff`.
    pub fn record(&mut self, backoff: Duration, now: Instant) {
        self.backoff_until = Some(now.checked_add(backoff).unwrap_or(now));
    }

    /// Returns the end of the backoff window if it is still in the future.
    pub fn active_until(&self, now: Instant) -> Option<Instant> {
        self.backoff_until.filter(|until| *until > now)
    }

    /// Clears the backoff window and restores the configured factors.
    pub fn reset(&mut self) {
        self.backoff_until = None;
        self.backoff_factor = self.default_backoff_factor;
        self.jitter_factor = self.default_jitter_factor;
    }

    pub fn set_backoff_factor(&mut self, factor: f64) {
        self.backoff_factor = clamp_backoff_factor(factor);
    }

    pub fn set_jitter_factor(&mut self, factor: f64) {
        self.jitter_factor = clamp_jitter_factor(factor);
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    pub fn min_rate(&self) -> Duration {
        self.min_rate
    }

    pub fn max_rate(&self) -> Duration {
        self.max_rate
    }

    pub fn backoff_until(&self) -> Option<Instant> {
        self.backoff_until
    }
}

/// Multiplies a duration by a non-negative factor, saturating instead of
/// panicking on overflow.
pub(crate) fn scale(value: Duration, factor: f64) -> Duration {
    if factor.is_nan() || factor < 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Perturbs `value` by a random amount up to `value * jitter_factor`.
///
/// A fair coin decides the sign, so about half of the results are shorter
/// than `value` and half are longer.
pub(crate) fn jittered(value: Duration, jitter_factor: f64) -> Duration {
    if value.is_zero() || jitter_factor.is_nan() || jitter_factor <= 0.0 {
        return value;
    }

    let mut rng = rand::rng();
    let offset = scale(value, jitter_factor * rng.random::<f64>());
    if rng.random_bool(0.5) {
        value.saturating_add(offset)
    } else {
        value.saturating_sub(offset)
    }
}
