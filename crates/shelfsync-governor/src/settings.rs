//! Construction parameters for a [`RequestGovernor`](crate::RequestGovernor)

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default minimum spacing between requests (2 seconds)
pub const DEFAULT_BASE_RATE: Duration = Duration::from_secs(2);

/// Default burst capacity (tokens)
pub const DEFAULT_BURST: u32 = 1;

/// Default number of simultaneous in-flight requests
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default ceiling for the backoff-adjusted rate (10 minutes)
pub const DEFAULT_MAX_RATE: Duration = Duration::from_secs(600);

/// Default multiplier applied to each backoff
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default fraction of a delay used as random jitter
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Default number of consecutive healthy responses before the rate recovers
pub const DEFAULT_RECOVERY_SUCCESSES: u32 = 100;

/// Tunable parameters for a request governor.
///
/// Durations are (de)serialized as integer milliseconds so the struct can be
/// embedded directly in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorSettings {
    /// Base (and minimum) spacing between token grants
    #[serde(rename = "base_rate_ms", with = "duration_ms")]
    pub base_rate: Duration,
    /// Maximum tokens the bucket can hold
    pub burst: u32,
    /// Maximum number of requests in flight at once
    pub max_concurrent: usize,
    /// Upper bound for the backoff-adjusted rate
    #[serde(rename = "max_rate_ms", with = "duration_ms")]
    pub max_rate: Duration,
    /// Multiplier applied on every rate-limit signal (>= 1.0)
    pub backoff_factor: f64,
    /// Jitter as a fraction of the delay (0.0..=1.0)
    pub jitter_factor: f64,
    /// Consecutive healthy responses after which a raised rate drops back to
    /// `base_rate`
    pub recovery_successes: u32,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            base_rate: DEFAULT_BASE_RATE,
            burst: DEFAULT_BURST,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_rate: DEFAULT_MAX_RATE,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            recovery_successes: DEFAULT_RECOVERY_SUCCESSES,
        }
    }
}

impl GovernorSettings {
    /// Returns a copy with out-of-range values replaced.
    ///
    /// Zero `base_rate`, `burst`, `max_concurrent` or `recovery_successes`
    /// fall back to the defaults, factors are clamped into range and
    /// `max_rate` is raised to at least `base_rate`.
    pub fn normalized(self) -> Self {
        let base_rate = if self.base_rate.is_zero() {
            DEFAULT_BASE_RATE
        } else {
            self.base_rate
        };
        let max_rate = if self.max_rate.is_zero() {
            DEFAULT_MAX_RATE
        } else {
            self.max_rate
        };

        Self {
            base_rate,
            burst: if self.burst == 0 {
                DEFAULT_BURST
            } else {
                self.burst
            },
            max_concurrent: if self.max_concurrent == 0 {
                DEFAULT_MAX_CONCURRENT
            } else {
                self.max_concurrent
            },
            max_rate: max_rate.max(base_rate),
            backoff_factor: clamp_backoff_factor(self.backoff_factor),
            jitter_factor: clamp_jitter_factor(self.jitter_factor),
            recovery_successes: if self.recovery_successes == 0 {
                DEFAULT_RECOVERY_SUCCESSES
            } else {
                self.recovery_successes
            },
        }
    }
}

/// Backoff factors below 1.0 would shrink the rate; non-finite values are unusable.
pub(crate) fn clamp_backoff_factor(factor: f64) -> f64 {
    if factor.is_finite() && factor >= 1.0 {
        factor
    } else {
        1.0
    }
}

pub(crate) fn clamp_jitter_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
