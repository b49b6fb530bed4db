//! Concurrency cap under load

use std::time::Duration;

use shelfsync_governor::RequestContext;

use crate::common::{governor, InFlightCounter};

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_cap() {
    let g = governor(Duration::from_millis(1), 20, 4);
    let counter = InFlightCounter::default();

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let g = g.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let permit = g.acquire(&RequestContext::new()).await.unwrap();
                counter.enter();
                tokio::time::sleep(Duration::from_millis(10 + (i % 7) * 5)).await;
                counter.exit();
                permit.release();
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert!(counter.peak() <= 4, "peak {}", counter.peak());
    assert!(counter.peak() >= 2, "load never overlapped");
    assert_eq!(g.available_permits(), 4);
    assert_eq!(g.in_flight(), 0);
    assert_eq!(g.get_metrics().requests, 40);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_holder_returns_permit() {
    let g = governor(Duration::from_millis(1), 1, 1);

    let holder = {
        let g = g.clone();
        tokio::spawn(async move {
            let _permit = g.acquire(&RequestContext::new()).await.unwrap();
            panic!("request handler failed");
        })
    };
    assert!(holder.await.is_err());

    assert_eq!(g.available_permits(), 1);
    let ctx = RequestContext::new().timeout(Duration::from_secs(1));
    assert!(g.acquire(&ctx).await.is_ok());
}

#[tokio::test]
async fn test_shutdown_wakes_waiters() {
    let g = governor(Duration::from_millis(1), 1, 1);
    let held = g.acquire(&RequestContext::new()).await.unwrap();

    let waiter = {
        let g = g.clone();
        tokio::spawn(async move { g.acquire(&RequestContext::new()).await.map(|_| ()) })
    };
    tokio::task::yield_now().await;

    g.shutdown();
    assert!(waiter.await.unwrap().is_err());
    drop(held);
}
