//! Concurrency gate
//!
//! Bounds the number of simultaneously in-flight requests independently of
//! pacing. Permits come from a [`tokio::sync::Semaphore`], which is safe for
//! concurrent use on its own and needs no extra locking.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::{context::RequestContext, GovernorError};

/// Fixed-size pool of in-flight request permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ConcurrencyGate {
    /// Creates a gate with `max_concurrent` permits (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Waits for a permit, giving up when `ctx` is cancelled or expires.
    ///
    /// If the context fires first the pending acquisition is dropped and no
    /// permit is taken.
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<GovernorPermit, GovernorError> {
        ctx.check()?;
        let semaphore = Arc::clone(&self.semaphore);

        tokio::select! {
            biased;
            err = ctx.done() => {
                debug!(error = %err, "Gave up waiting for a concurrency permit");
                Err(err)
            }
            permit = semaphore.acquire_owned() => permit
                .map(GovernorPermit::new)
                .map_err(|_| GovernorError::Closed),
        }
    }

    /// Closes the pool: pending and future acquisitions fail with
    /// [`GovernorError::Closed`]. Permits already handed out stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of permits currently held by callers.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }
}

/// Proof that a caller holds one in-flight slot.
///
/// Dropping the permit returns the slot to the pool, so it is released on
/// every exit path, including early returns and cancelled futures.
/// [`release`](Self::release) makes the hand-back explicit.
#[derive(Debug)]
#[must_use = "dropping the permit immediately releases the concurrency slot"]
pub struct GovernorPermit {
    _permit: OwnedSemaphorePermit,
}

impl GovernorPermit {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { _permit: permit }
    }

    /// Returns the slot to the pool.
    pub fn release(self) {
        drop(self);
    }
}
