//! Cancellation and deadline context for governor waits

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::GovernorError;

/// Caller-supplied signal that bounds how long [`acquire`] may wait.
///
/// Combines a [`CancellationToken`] with an optional deadline. Cloning shares
/// the token, so cancelling one clone cancels them all.
///
/// [`acquire`]: crate::RequestGovernor::acquire
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context driven by an existing token, e.g. a shutdown token or a
    /// child of one.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Sets an absolute deadline.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now.
    pub fn timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.deadline(deadline)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels the context (and every clone sharing its token).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the error the context has already resolved to, if any.
    pub fn check(&self) -> Result<(), GovernorError> {
        if self.token.is_cancelled() {
            return Err(GovernorError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(GovernorError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a context created with [`RequestContext::new`].
    pub async fn done(&self) -> GovernorError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => GovernorError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => GovernorError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                GovernorError::Cancelled
            }
        }
    }
}

/// Roughly thirty years from now.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
