//! Governor settings derived from API configuration

use std::time::Duration;

use shelfsync_core::config::ApiConfig;
use shelfsync_governor::GovernorSettings;

/// Builds the governor settings for one API section of the configuration.
pub fn governor_settings(api: &ApiConfig) -> GovernorSettings {
    GovernorSettings {
        base_rate: Duration::from_millis(api.rate_ms),
        burst: api.burst,
        max_concurrent: api.max_concurrent,
        max_rate: Duration::from_millis(api.max_rate_ms),
        backoff_factor: api.backoff_factor,
        jitter_factor: api.jitter_factor,
        recovery_successes: api.recovery_successes,
    }
    .normalized()
}
