//! Token pacing across tasks

use std::time::Duration;

use shelfsync_governor::RequestContext;
use tokio::time::Instant;

use crate::common::governor;

#[tokio::test(start_paused = true)]
async fn test_requests_are_spaced_by_rate() {
    let g = governor(Duration::from_millis(100), 1, 1);
    let ctx = RequestContext::new();

    let mut grants = Vec::new();
    for _ in 0..4 {
        g.acquire(&ctx).await.unwrap().release();
        grants.push(Instant::now());
    }

    for pair in grants.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(80), "gap {:?}", gap);
    }
    assert_eq!(g.get_metrics().requests, 4);
}

#[tokio::test(start_paused = true)]
async fn test_burst_then_pacing() {
    let g = governor(Duration::from_millis(1000), 5, 5);
    let ctx = RequestContext::new();
    let start = Instant::now();

    for _ in 0..5 {
        g.acquire(&ctx).await.unwrap().release();
    }
    assert!(start.elapsed() < Duration::from_millis(10));

    g.acquire(&ctx).await.unwrap().release();
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waiters_each_get_their_own_slot() {
    let g = governor(Duration::from_millis(100), 1, 10);
    let start = Instant::now();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let g = g.clone();
            tokio::spawn(async move {
                g.acquire(&RequestContext::new()).await.unwrap().release();
                Instant::now()
            })
        })
        .collect();

    let mut grants = Vec::new();
    for handle in handles {
        grants.push(handle.await.unwrap());
    }
    grants.sort();

    // Five tokens at one per 100ms: the last cannot come before ~400ms.
    assert!(grants[4] - start >= Duration::from_millis(320), "{:?}", grants[4] - start);
    assert_eq!(g.get_metrics().requests, 5);
}

#[tokio::test(start_paused = true)]
async fn test_idle_bucket_refills_to_burst() {
    let g = governor(Duration::from_millis(100), 3, 3);
    let ctx = RequestContext::new();

    for _ in 0..3 {
        g.acquire(&ctx).await.unwrap().release();
    }
    assert_eq!(g.available_tokens(), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(g.available_tokens(), 3);
}
