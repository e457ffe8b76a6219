//! Run counters and stage timings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Atomic counters shared by the pipeline stages.
#[derive(Debug, Default)]
pub struct Stats {
    /// Files emitted by the walker.
    pub traversed: AtomicU64,
    /// Files that passed the cache filter and matched at least one formatter.
    pub matched: AtomicU64,
    /// Files whose every applicable formatter completed successfully.
    pub formatted: AtomicU64,
    /// Files whose `(size, mtime)` differ after formatting.
    pub changed: AtomicU64,
    /// Wall-clock spent walking, in microseconds.
    pub walk_us: AtomicU64,
    /// Wall-clock spent in formatter processes and re-stat, in microseconds.
    pub format_us: AtomicU64,
}

impl Stats {
    /// Create a new shared stats tracker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_traversed(&self, n: u64) {
        self.traversed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_matched(&self, n: u64) {
        self.matched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_formatted(&self, n: u64) {
        self.formatted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_changed(&self, n: u64) {
        self.changed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_walk_time(&self, elapsed: Duration) {
        self.walk_us
            .fetch_add(duration_us(elapsed), Ordering::Relaxed);
    }

    pub fn record_format_time(&self, elapsed: Duration) {
        self.format_us
            .fetch_add(duration_us(elapsed), Ordering::Relaxed);
    }

    /// Get a snapshot of current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            traversed: self.traversed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            formatted: self.formatted.load(Ordering::Relaxed),
            changed: self.changed.load(Ordering::Relaxed),
            walk: Duration::from_micros(self.walk_us.load(Ordering::Relaxed)),
            format: Duration::from_micros(self.format_us.load(Ordering::Relaxed)),
        }
    }
}

fn duration_us(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Snapshot of run stats.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub traversed: u64,
    pub matched: u64,
    pub formatted: u64,
    pub changed: u64,
    pub walk: Duration,
    pub format: Duration,
}
