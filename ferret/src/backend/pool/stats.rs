//! Pool counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals, updated lock-free.
#[derive(Debug, Default)]
pub struct Stats {
    pub checkouts: AtomicU64,
    pub checkins: AtomicU64,
    pub timeouts: AtomicU64,
    pub endpoints_spawned: AtomicU64,
    pub endpoints_evicted: AtomicU64,
}

/// Point-in-time snapshot of [`Stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub checkouts: u64,
    pub checkins: u64,
    pub timeouts: u64,
    pub endpoints_spawned: u64,
    pub endpoints_evicted: u64,
}

impl Stats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Counts {
        Counts {
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            endpoints_spawned: self.endpoints_spawned.load(Ordering::Relaxed),
            endpoints_evicted: self.endpoints_evicted.load(Ordering::Relaxed),
        }
    }
}
