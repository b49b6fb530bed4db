//! Request and throttling counters

use std::time::Duration;

use serde::Serialize;

/// Point-in-time copy of a governor's counters.
///
/// Returned by value; mutating it has no effect on the governor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Requests admitted by `acquire`
    pub requests: u64,
    /// Rate-limit signals applied (backoffs)
    pub rate_limited: u64,
    /// Rate-limit signals that carried an explicit retry delay
    pub retry_after_count: u64,
    /// Effective spacing between requests at snapshot time
    pub current_rate: Duration,
}

/// Monotonic counters kept inside the governor state.
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    requests: u64,
    rate_limited: u64,
    retry_after_count: u64,
}

impl MetricsRecorder {
    pub(crate) fn record_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    pub(crate) fn record_rate_limited(&mut self, had_retry_after: bool) {
        self.rate_limited = self.rate_limited.saturating_add(1);
        if had_retry_after {
            self.retry_after_count = self.retry_after_count.saturating_add(1);
        }
    }

    pub(crate) fn snapshot(&self, current_rate: Duration) -> Metrics {
        Metrics {
            requests: self.requests,
            rate_limited: self.rate_limited,
            retry_after_count: self.retry_after_count,
            current_rate,
        }
    }
}
