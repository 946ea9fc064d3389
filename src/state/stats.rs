use std::sync::atomic::{AtomicU64, Ordering};

/// Page counters for a single spider run
#[derive(Debug, Default)]
pub struct RunStats {
    success: AtomicU64,
    failure: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a request that completed successfully
    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request that failed for the first time in this run
    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }
}
