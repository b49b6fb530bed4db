//! Token bucket pacing primitive
//!
//! The bucket tracks a minimum interval between grants (`rate`) and a whole
//! number of tokens that refill at one token per `rate`, capped at the burst
//! size. It holds no lock of its own: the governor keeps it behind its state
//! lock and passes in the current instant, which also keeps the arithmetic
//! deterministic under test.

use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::jittered;

/// Token bucket with whole-token accounting.
///
/// Invariant: `0 <= tokens <= max_tokens` and `max_tokens >= 1`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current spacing between token grants
    rate: Duration,
    /// Tokens available right now
    tokens: u32,
    /// Burst capacity
    max_tokens: u32,
    /// Instant up to which elapsed time has been converted into tokens
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// A `max_tokens` of zero is treated as one so the bucket can always make
    /// progress.
    pub fn new(rate: Duration, max_tokens: u32, now: Instant) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            rate,
            tokens: max_tokens,
            max_tokens,
            last_refill: now,
        }
    }

    /// Converts time elapsed since the last refill into whole tokens.
    ///
    /// `last_refill` advances by exactly the time that was converted, so the
    /// fractional remainder carries over to the next refill. Once the bucket
    /// is full the remainder is discarded.
    pub fn refill(&mut self, now: Instant) {
        let room = self.max_tokens - self.tokens;
        let earned = self.earned(now);
        if earned == 0 {
            return;
        }

        if earned >= u128::from(room) {
            self.tokens = self.max_tokens;
            self.last_refill = now;
            return;
        }

        // earned < room <= u32::MAX
        let earned = earned as u32;
        self.tokens += earned;
        self.last_refill = self
            .rate
            .checked_mul(earned)
            .and_then(|advance| self.last_refill.checked_add(advance))
            .unwrap_or(now);
    }

    /// Refills, then takes one token if available.
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Earliest instant at which the next token should be handed out.
    ///
    /// The interval is perturbed by up to `rate * jitter_factor` in either
    /// direction so that waiters do not all wake at the same moment.
    pub fn next_token_at(&self, jitter_factor: f64) -> Instant {
        let interval = jittered(self.rate, jitter_factor);
        self.last_refill
            .checked_add(interval)
            .unwrap_or(self.last_refill)
    }

    /// Records a grant that was earned by sleeping rather than taken from the
    /// bucket: the waited-for token is consumed on the spot.
    pub fn grant_after_wait(&mut self, now: Instant) {
        self.last_refill = now;
    }

    /// Drops any accumulated burst, leaving a single token.
    pub fn reset_burst(&mut self) {
        self.tokens = 1;
    }

    /// Tokens that would be available at `now`, without mutating the bucket.
    pub fn available(&self, now: Instant) -> u32 {
        let room = self.max_tokens - self.tokens;
        let earned = self.earned(now).min(u128::from(room));
        // earned <= room <= u32::MAX
        self.tokens + earned as u32
    }

    fn earned(&self, now: Instant) -> u128 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if self.rate.is_zero() {
            return u128::from(self.max_tokens);
        }
        elapsed.as_nanos() / self.rate.as_nanos()
    }

    pub fn rate(&self) -> Duration {
        self.rate
    }

    pub fn set_rate(&mut self, rate: Duration) {
        self.rate = rate;
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}
