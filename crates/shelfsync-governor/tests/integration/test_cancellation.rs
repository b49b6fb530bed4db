//! Cancellation and deadlines leave no trace

use std::time::Duration;

use shelfsync_governor::{GovernorError, RequestContext};
use tokio_util::sync::CancellationToken;

use crate::common::governor;

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_permit() {
    let g = governor(Duration::from_millis(1), 5, 1);
    let held = g.acquire(&RequestContext::new()).await.unwrap();
    let before = g.get_metrics();

    let ctx = RequestContext::new();
    let waiter = {
        let g = g.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { g.acquire(&ctx).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel();

    assert_eq!(waiter.await.unwrap(), Err(GovernorError::Cancelled));
    assert_eq!(g.get_metrics(), before);

    drop(held);
    assert_eq!(g.available_permits(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_while_waiting_for_token() {
    let g = governor(Duration::from_secs(10), 1, 2);
    g.acquire(&RequestContext::new()).await.unwrap().release();
    let tokens_before = g.available_tokens();

    let ctx = RequestContext::new().timeout(Duration::from_millis(500));
    assert_eq!(
        g.acquire(&ctx).await.unwrap_err(),
        GovernorError::DeadlineExceeded
    );

    assert_eq!(g.available_tokens(), tokens_before);
    assert_eq!(g.available_permits(), 2);
    assert_eq!(g.get_metrics().requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_parent_token_cancels_all_waiters() {
    let g = governor(Duration::from_secs(60), 1, 8);
    g.acquire(&RequestContext::new()).await.unwrap().release();

    let shutdown = CancellationToken::new();
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let g = g.clone();
            let ctx = RequestContext::with_token(shutdown.child_token());
            tokio::spawn(async move { g.acquire(&ctx).await.map(|_| ()) })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Err(GovernorError::Cancelled));
    }
    assert_eq!(g.available_permits(), 8);
    assert_eq!(g.get_metrics().requests, 1);
}

#[tokio::test]
async fn test_already_cancelled_context_returns_immediately() {
    let g = governor(Duration::from_secs(60), 1, 1);
    let ctx = RequestContext::new();
    ctx.cancel();

    assert_eq!(g.acquire(&ctx).await.unwrap_err(), GovernorError::Cancelled);
    assert_eq!(g.available_tokens(), 1);
}
