//! Request governor facade
//!
//! One [`RequestGovernor`] per API client. Callers:
//!
//! 1. `acquire` a [`GovernorPermit`] before sending a request,
//! 2. send the request,
//! 3. drop or [`release`](GovernorPermit::release) the permit,
//! 4. report the response with [`observe_response`](RequestGovernor::observe_response)
//!    (or [`observe_rate_limit`](RequestGovernor::observe_rate_limit) when the
//!    caller detected throttling itself).
//!
//! ## Locking
//!
//! Pacing state (bucket, backoff window, factors, counters) lives behind a
//! single `RwLock` and every mutation happens in one write section. The lock
//! is never held across an `.await`: waits compute a target instant under the
//! lock, release it, sleep, and re-take it once on wake. Concurrency permits
//! come from a separate semaphore and never touch the lock.

use std::{
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use reqwest::{header::HeaderMap, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    backoff::{scale, BackoffController},
    bucket::TokenBucket,
    concurrency::{ConcurrencyGate, GovernorPermit},
    context::RequestContext,
    headers::{self, BackoffHint, HintSource, PREEMPTIVE_RESET_FRACTION},
    metrics::{Metrics, MetricsRecorder},
    settings::GovernorSettings,
    GovernorError,
};

/// Mutable pacing state guarded by the governor's lock.
#[derive(Debug)]
struct GovernorState {
    bucket: TokenBucket,
    backoff: BackoffController,
    metrics: MetricsRecorder,
    /// Healthy responses observed since the last backoff or recovery
    success_streak: u32,
}

fn restore_base_rate(state: &mut GovernorState) {
    let min_rate = state.backoff.min_rate();
    state.bucket.set_rate(min_rate);
    state.backoff.reset();
    state.success_streak = 0;
}

/// What an acquiring caller has to wait for next.
enum Wait {
    /// An active backoff window
    Backoff(Instant),
    /// The next token; `slot` is the bucket's refill mark when the wait began
    Token { at: Instant, slot: Instant },
}

/// Adaptive client-side request governor.
///
/// Combines a token bucket, a concurrency gate and a backoff controller.
/// Share it between tasks with `Arc<RequestGovernor>`.
#[derive(Debug)]
pub struct RequestGovernor {
    state: RwLock<GovernorState>,
    gate: ConcurrencyGate,
    settings: GovernorSettings,
}

impl RequestGovernor {
    /// Creates a governor from the three caller-facing parameters.
    ///
    /// Zero values fall back to the defaults (2s rate, burst 1, 3 concurrent).
    pub fn new(rate: Duration, burst: u32, max_concurrent: usize) -> Self {
        Self::with_settings(GovernorSettings {
            base_rate: rate,
            burst,
            max_concurrent,
            ..GovernorSettings::default()
        })
    }

    /// Creates a governor from full settings (normalized first).
    pub fn with_settings(settings: GovernorSettings) -> Self {
        let settings = settings.normalized();
        let now = Instant::now();
        debug!(
            rate_ms = settings.base_rate.as_millis() as u64,
            burst = settings.burst,
            max_concurrent = settings.max_concurrent,
            "Creating request governor"
        );

        Self {
            state: RwLock::new(GovernorState {
                bucket: TokenBucket::new(settings.base_rate, settings.burst, now),
                backoff: BackoffController::new(
                    settings.base_rate,
                    settings.max_rate,
                    settings.backoff_factor,
                    settings.jitter_factor,
                ),
                metrics: MetricsRecorder::default(),
                success_streak: 0,
            }),
            gate: ConcurrencyGate::new(settings.max_concurrent),
            settings,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GovernorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GovernorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Acquire
    // ========================================================================

    /// Waits until a request may be sent, then returns its permit.
    ///
    /// Waits, in order, for any active backoff window, a concurrency permit
    /// and a token. Every wait observes `ctx`; on cancellation or deadline the
    /// error is returned and no token is consumed. A permit obtained before
    /// the context fired is released before returning.
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<GovernorPermit, GovernorError> {
        ctx.check()?;

        while let Some(until) = self.active_backoff() {
            debug!(
                wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Waiting for backoff window"
            );
            wait_until(ctx, until).await?;
        }

        let permit = self.gate.acquire(ctx).await?;

        loop {
            let wait = match self.take_token() {
                Some(wait) => wait,
                None => return Ok(permit),
            };

            match wait {
                Wait::Backoff(until) => {
                    wait_until(ctx, until).await?;
                }
                Wait::Token { at, slot } => {
                    debug!(
                        wait_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "No tokens available, waiting for refill"
                    );
                    wait_until(ctx, at).await?;
                    if self.take_token_after_wait(slot) {
                        return Ok(permit);
                    }
                }
            }
        }
    }

    fn active_backoff(&self) -> Option<Instant> {
        self.read().backoff.active_until(Instant::now())
    }

    /// Takes a token if one is available; otherwise says what to wait for.
    fn take_token(&self) -> Option<Wait> {
        let mut state = self.write();
        let now = Instant::now();

        if let Some(until) = state.backoff.active_until(now) {
            return Some(Wait::Backoff(until));
        }
        if state.bucket.try_take(now) {
            state.metrics.record_request();
            return None;
        }

        let jitter_factor = state.backoff.jitter_factor();
        Some(Wait::Token {
            at: state.bucket.next_token_at(jitter_factor),
            slot: state.bucket.last_refill(),
        })
    }

    /// Settles a completed token wait.
    ///
    /// The wait earns the slot it was computed for, unless another caller
    /// claimed that slot first or a backoff started in the meantime.
    fn take_token_after_wait(&self, slot: Instant) -> bool {
        let mut state = self.write();
        let now = Instant::now();

        if state.backoff.active_until(now).is_some() {
            return false;
        }
        if state.bucket.try_take(now) {
            state.metrics.record_request();
            return true;
        }
        if state.bucket.last_refill() == slot {
            state.bucket.grant_after_wait(now);
            state.metrics.record_request();
            return true;
        }
        false
    }

    // ========================================================================
    // Feedback
    // ========================================================================

    /// Applies a rate-limit signal and returns the backoff that was applied.
    ///
    /// A positive `retry_after` is the server's requested delay; zero means
    /// "back off from the current rate". The rate only ever moves up here;
    /// it comes back down through [`record_success`](Self::record_success)
    /// or [`reset_rate`](Self::reset_rate).
    pub fn observe_rate_limit(&self, retry_after: Duration) -> Duration {
        self.apply_backoff(retry_after, !retry_after.is_zero())
    }

    fn apply_backoff(&self, delay: Duration, counts_as_retry_after: bool) -> Duration {
        let mut state = self.write();
        let now = Instant::now();

        let old_rate = state.bucket.rate();
        let backoff = state.backoff.compute(delay, old_rate);
        let new_rate = state.backoff.clamp(backoff.max(old_rate));

        state.bucket.set_rate(new_rate);
        state.bucket.reset_burst();
        state.backoff.record(backoff, now);
        state.metrics.record_rate_limited(counts_as_retry_after);
        state.success_streak = 0;

        warn!(
            retry_after_ms = delay.as_millis() as u64,
            backoff_ms = backoff.as_millis() as u64,
            old_rate_ms = old_rate.as_millis() as u64,
            new_rate_ms = new_rate.as_millis() as u64,
            "Rate limit signalled, backing off"
        );
        backoff
    }

    /// Adjusts pacing from a response's status and headers.
    ///
    /// A 2xx response that asks for no backoff counts towards recovery.
    /// Never fails: unusable headers are logged and skipped.
    pub fn observe_response(&self, status: StatusCode, headers: &HeaderMap) {
        let adjustment = headers::interpret(status, headers, self.get_rate());

        match adjustment.backoff {
            Some(BackoffHint { delay, source }) => {
                debug!(status = status.as_u16(), ?source, "Response requests a backoff");
                self.apply_backoff(delay, source == HintSource::RetryAfter);
            }
            None if status.is_success() => self.record_success(),
            None => {}
        }
        if let Some(reset) = adjustment.ensure_rate_under {
            self.ensure_rate_under(reset);
        }
    }

    /// Slows down ahead of a quota reset without opening a backoff window.
    ///
    /// Raises the rate to `reset * 0.8` (capped at the maximum rate) if that is
    /// slower than the current rate. Counters are not touched.
    pub fn ensure_rate_under(&self, reset: Duration) {
        let mut state = self.write();
        let target = scale(reset, PREEMPTIVE_RESET_FRACTION).min(state.backoff.max_rate());
        let current = state.bucket.rate();
        if target > current {
            state.bucket.set_rate(target);
            info!(
                old_rate_ms = current.as_millis() as u64,
                new_rate_ms = target.as_millis() as u64,
                "Slowing down ahead of rate-limit reset"
            );
        }
    }

    /// Counts one healthy response.
    ///
    /// Responses that arrive while a backoff window is open break the streak.
    /// After `recovery_successes` in a row the rate is reset as by
    /// [`reset_rate`](Self::reset_rate), if it is above the base rate.
    pub fn record_success(&self) {
        let mut state = self.write();
        if state.backoff.active_until(Instant::now()).is_some() {
            state.success_streak = 0;
            return;
        }

        state.success_streak = state.success_streak.saturating_add(1);
        if state.success_streak < self.settings.recovery_successes {
            return;
        }
        state.success_streak = 0;

        let old_rate = state.bucket.rate();
        if old_rate > state.backoff.min_rate() {
            restore_base_rate(&mut state);
            debug!(
                successes = self.settings.recovery_successes,
                old_rate_ms = old_rate.as_millis() as u64,
                new_rate_ms = state.bucket.rate().as_millis() as u64,
                "Adaptive recovery: restoring base rate"
            );
        }
    }

    /// Restores the base rate, clears any backoff window and resets the
    /// backoff and jitter factors. Tokens are left as they are.
    pub fn reset_rate(&self) {
        let mut state = self.write();
        restore_base_rate(&mut state);
        info!(rate_ms = state.bucket.rate().as_millis() as u64, "Request rate reset");
    }

    // ========================================================================
    // Accessors and tuning
    // ========================================================================

    /// Current spacing between requests.
    pub fn get_rate(&self) -> Duration {
        self.read().bucket.rate()
    }

    /// Snapshot of the counters and current rate.
    pub fn get_metrics(&self) -> Metrics {
        let state = self.read();
        state.metrics.snapshot(state.bucket.rate())
    }

    pub fn set_backoff_factor(&self, factor: f64) {
        self.write().backoff.set_backoff_factor(factor);
    }

    pub fn set_jitter_factor(&self, factor: f64) {
        self.write().backoff.set_jitter_factor(factor);
    }

    pub fn backoff_factor(&self) -> f64 {
        self.read().backoff.backoff_factor()
    }

    pub fn jitter_factor(&self) -> f64 {
        self.read().backoff.jitter_factor()
    }

    /// Time left in the active backoff window, if any.
    pub fn backoff_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.read()
            .backoff
            .active_until(now)
            .map(|until| until.saturating_duration_since(now))
    }

    /// Tokens that could be taken right now.
    pub fn available_tokens(&self) -> u32 {
        self.read().bucket.available(Instant::now())
    }

    pub fn max_tokens(&self) -> u32 {
        self.read().bucket.max_tokens()
    }

    pub fn min_rate(&self) -> Duration {
        self.read().backoff.min_rate()
    }

    pub fn max_rate(&self) -> Duration {
        self.read().backoff.max_rate()
    }

    pub fn max_concurrent(&self) -> usize {
        self.gate.max_concurrent()
    }

    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Settings the governor was built with (after normalization).
    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    /// Stops admitting requests; waiting and future `acquire` calls fail
    /// with [`GovernorError::Closed`].
    pub fn shutdown(&self) {
        info!("Request governor shutting down");
        self.gate.close();
    }
}

impl Default for RequestGovernor {
    fn default() -> Self {
        Self::with_settings(GovernorSettings::default())
    }
}

/// Sleeps until `deadline` unless the context fires first.
async fn wait_until(ctx: &RequestContext, deadline: Instant) -> Result<(), GovernorError> {
    tokio::select! {
        biased;
        err = ctx.done() => Err(err),
        _ = tokio::time::sleep_until(deadline) => Ok(()),
    }
}
