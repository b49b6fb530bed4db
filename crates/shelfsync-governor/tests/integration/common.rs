//! Shared helpers for governor integration tests

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use shelfsync_governor::{GovernorSettings, RequestGovernor};

/// Builds a shareable governor with jitter disabled so waits are exact.
pub fn governor(rate: Duration, burst: u32, max_concurrent: usize) -> Arc<RequestGovernor> {
    Arc::new(RequestGovernor::with_settings(GovernorSettings {
        base_rate: rate,
        burst,
        max_concurrent,
        jitter_factor: 0.0,
        ..GovernorSettings::default()
    }))
}

/// Tracks how many tasks are inside a section at once and the peak seen.
#[derive(Debug, Default, Clone)]
pub struct InFlightCounter {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InFlightCounter {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
