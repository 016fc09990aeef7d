//! Prometheus export of the scheduler statistics.
//!
//! | Metric | Type |
//! |--------|------|
//! | `rqq_requests` | Gauge |
//! | `rqq_threads` | Gauge |
//! | `rqq_dropped_window` | Gauge |
//! | `rqq_processed_total` | Counter |
//! | `rqq_dropped_total` | Counter |
//! | `rqq_errors_total` | Counter |
//! | `rqq_dispatch_calls_total` | Counter |
//!
//! Counters only move forward: after a scheduler reset they hold their value
//! until the new totals overtake it.

use crate::error::RqqResult;
use crate::stats::StatsSnapshot;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus mirror of a [`StatsSnapshot`]
#[derive(Clone)]
pub struct RqqMetrics {
    registry: Registry,
    requests: IntGauge,
    threads: IntGauge,
    dropped_window: IntGauge,
    processed_total: IntCounter,
    dropped_total: IntCounter,
    errors_total: IntCounter,
    dispatch_calls_total: IntCounter,
}

impl RqqMetrics {
    /// Create the metric families on a fresh registry.
    pub fn new() -> RqqResult<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the metric families on an existing registry.
    pub fn with_registry(registry: Registry) -> RqqResult<Self> {
        let requests = IntGauge::new("rqq_requests", "Items admitted and not yet terminal")?;
        registry.register(Box::new(requests.clone()))?;

        let threads = IntGauge::new("rqq_threads", "Invocations currently in flight")?;
        registry.register(Box::new(threads.clone()))?;

        let dropped_window =
            IntGauge::new("rqq_dropped_window", "Items dropped during the last tick")?;
        registry.register(Box::new(dropped_window.clone()))?;

        let processed_total =
            IntCounter::new("rqq_processed_total", "Items that completed every stage")?;
        registry.register(Box::new(processed_total.clone()))?;

        let dropped_total = IntCounter::new("rqq_dropped_total", "Items dropped")?;
        registry.register(Box::new(dropped_total.clone()))?;

        let errors_total = IntCounter::new("rqq_errors_total", "Failed invocation attempts")?;
        registry.register(Box::new(errors_total.clone()))?;

        let dispatch_calls_total =
            IntCounter::new("rqq_dispatch_calls_total", "Invocations issued")?;
        registry.register(Box::new(dispatch_calls_total.clone()))?;

        Ok(Self {
            registry,
            requests,
            threads,
            dropped_window,
            processed_total,
            dropped_total,
            errors_total,
            dispatch_calls_total,
        })
    }

    /// Copy a snapshot into the metric families.
    pub fn observe(&self, snapshot: &StatsSnapshot) {
        self.requests.set(gauge_value(snapshot.requests));
        self.threads.set(gauge_value(snapshot.threads));
        self.dropped_window.set(gauge_value(snapshot.dropped));

        catch_up(&self.processed_total, snapshot.total_processed);
        catch_up(&self.dropped_total, snapshot.total_dropped);
        catch_up(&self.errors_total, snapshot.total_errors);
        catch_up(&self.dispatch_calls_total, snapshot.dispatch_calls);
    }

    /// Render every family in the Prometheus text format.
    pub fn encode_text(&self) -> RqqResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics output is not UTF-8: {e}")).into())
    }

    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn catch_up(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_encode() {
        let metrics = RqqMetrics::new().unwrap();
        metrics.observe(&StatsSnapshot {
            requests: 3,
            threads: 2,
            dropped: 1,
            total_processed: 10,
            total_dropped: 1,
            total_errors: 4,
            dispatch_calls: 15,
        });

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("rqq_requests 3"));
        assert!(text.contains("rqq_threads 2"));
        assert!(text.contains("rqq_processed_total 10"));
        assert!(text.contains("rqq_dispatch_calls_total 15"));
    }

    #[test]
    fn test_counters_never_go_back() {
        let metrics = RqqMetrics::new().unwrap();
        metrics.observe(&StatsSnapshot {
            total_errors: 5,
            ..Default::default()
        });
        metrics.observe(&StatsSnapshot::default());
        metrics.observe(&StatsSnapshot {
            total_errors: 7,
            ..Default::default()
        });

        assert_eq!(metrics.errors_total.get(), 7);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let metrics = RqqMetrics::new().unwrap();
        assert!(RqqMetrics::with_registry(metrics.registry().clone()).is_err());
    }
}
