//! Shelfsync Governor - adaptive client-side request throttling
//!
//! Keeps outbound API traffic inside the remote service's rate limits while
//! admitting as many requests as is safe. One [`RequestGovernor`] is owned by
//! each API client and coordinates three independent concerns:
//!
//! - **Pacing**: a [`TokenBucket`] enforcing a minimum spacing (`rate`) between
//!   requests, with a small burst allowance.
//! - **Concurrency**: a [`ConcurrencyGate`] capping simultaneous in-flight requests.
//! - **Backoff**: a [`BackoffController`] that slows the bucket down when the
//!   server reports throttling (`429`, `Retry-After`, `RateLimit-*` headers).
//!
//! ## Modules
//!
//! - [`bucket`] - token bucket pacing primitive
//! - [`backoff`] - backoff window, factors and jitter
//! - [`concurrency`] - permit pool and the [`GovernorPermit`] guard
//! - [`context`] - cancellation / deadline context for [`RequestGovernor::acquire`]
//! - [`headers`] - interpretation of rate-limit response headers
//! - [`retry_after`] - `Retry-After` header parsing
//! - [`metrics`] - counters and snapshots
//! - [`governor`] - the [`RequestGovernor`] facade
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use shelfsync_governor::{RequestContext, RequestGovernor};
//!
//! # async fn example() -> Result<(), shelfsync_governor::GovernorError> {
//! let governor = RequestGovernor::new(Duration::from_secs(1), 2, 3);
//! let ctx = RequestContext::new().timeout(Duration::from_secs(30));
//!
//! let permit = governor.acquire(&ctx).await?;
//! // ... send the HTTP request ...
//! permit.release();
//! // governor.observe_response(response.status(), response.headers());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod bucket;
pub mod concurrency;
pub mod context;
pub mod governor;
pub mod headers;
pub mod metrics;
pub mod retry_after;
pub mod settings;

pub use backoff::BackoffController;
pub use bucket::TokenBucket;
pub use concurrency::{ConcurrencyGate, GovernorPermit};
pub use context::RequestContext;
pub use governor::RequestGovernor;
pub use headers::{Adjustment, BackoffHint, HintSource};
pub use metrics::Metrics;
pub use retry_after::{parse_retry_after, RetryAfterError};
pub use settings::GovernorSettings;

use thiserror::Error;

/// Errors returned by [`RequestGovernor::acquire`]
///
/// Rate limiting itself is never an error: it only shows up as extra latency
/// before the next request is admitted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GovernorError {
    /// The caller's cancellation token fired while waiting
    #[error("request cancelled while waiting for the governor")]
    Cancelled,

    /// The caller's deadline passed while waiting
    #[error("deadline exceeded while waiting for the governor")]
    DeadlineExceeded,

    /// The governor was shut down and no longer admits requests
    #[error("governor is shut down")]
    Closed,
}
