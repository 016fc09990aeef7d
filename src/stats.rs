//! Statistics collector.
//!
//! Counters are atomics so external callers can take a snapshot while a tick
//! is running. All writes come from the tick-serialized dispatcher path.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Items admitted and not yet terminal
    pub requests: u64,
    /// Invocations currently in flight
    pub threads: u64,
    /// Drops committed during the current stats window
    pub dropped: u64,
    /// Items that completed every stage
    pub total_processed: u64,
    /// Items dropped
    pub total_dropped: u64,
    /// Failed attempts
    pub total_errors: u64,
    /// Invocations issued
    pub dispatch_calls: u64,
}

/// Shared statistics counters
#[derive(Debug, Default)]
pub struct Statistics {
    requests: AtomicU64,
    threads: AtomicU64,
    window_dropped: AtomicU64,
    total_processed: AtomicU64,
    total_dropped: AtomicU64,
    total_errors: AtomicU64,
    dispatch_calls: AtomicU64,
}

fn decrement(counter: &AtomicU64) {
    // Saturate instead of wrapping if a reset raced an in-flight resolution
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(1))
    });
}

impl Statistics {
    /// Create zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn item_admitted(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invocation_started(&self) {
        self.threads.fetch_add(1, Ordering::Relaxed);
        self.dispatch_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invocation_finished(&self) {
        decrement(&self.threads);
    }

    pub(crate) fn attempt_failed(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn item_processed(&self) {
        decrement(&self.requests);
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn item_dropped(&self) {
        decrement(&self.requests);
        self.window_dropped.fetch_add(1, Ordering::Relaxed);
        self.total_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Start a new reporting window for the `dropped` gauge
    pub(crate) fn begin_window(&self) {
        self.window_dropped.store(0, Ordering::Relaxed);
    }

    /// Zero every gauge and counter
    pub(crate) fn reset(&self) {
        for counter in [
            &self.requests,
            &self.threads,
            &self.window_dropped,
            &self.total_processed,
            &self.total_dropped,
            &self.total_errors,
            &self.dispatch_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Read every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            threads: self.threads.load(Ordering::Relaxed),
            dropped: self.window_dropped.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            dispatch_calls: self.dispatch_calls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_follow_lifecycle() {
        let stats = Statistics::new();
        stats.item_admitted();
        stats.item_admitted();
        stats.invocation_started();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.threads, 1);
        assert_eq!(snapshot.dispatch_calls, 1);

        stats.invocation_finished();
        stats.item_processed();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.threads, 0);
        assert_eq!(snapshot.total_processed, 1);
    }

    #[test]
    fn test_dropped_gauge_is_windowed() {
        let stats = Statistics::new();
        stats.item_admitted();
        stats.attempt_failed();
        stats.item_dropped();

        assert_eq!(stats.snapshot().dropped, 1);
        stats.begin_window();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped, 0);
        assert_eq!(snapshot.total_dropped, 1);
        assert_eq!(snapshot.total_errors, 1);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = Statistics::new();
        stats.item_admitted();
        stats.invocation_started();
        stats.attempt_failed();
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_decrement_saturates() {
        let stats = Statistics::new();
        stats.invocation_finished();
        assert_eq!(stats.snapshot().threads, 0);
    }
}
