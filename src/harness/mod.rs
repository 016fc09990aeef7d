//! Deterministic test harnesses.
//!
//! Every harness runs an [`Rqq`] on a [`VirtualClock`] and moves time with
//! two helpers:
//! - [`Simulation::pass_time`]: per simulated second, advance one second and
//!   tick twice
//! - [`Simulation::pass_time_minutes`]: advance `minutes` and tick once,
//!   `times` times
//!
//! [`RequestHarness`] drives single-stage requests with scripted failures.
//! [`JobHarness`] drives the three-stage `get_data -> do_work -> post_work`
//! workflow where every stage fails once before succeeding.

use crate::clock::{Clock, VirtualClock};
use crate::config::{DurationExt, RqqConfig};
use crate::core::{Invoker, Rqq};
use crate::error::RqqResult;
use crate::stats::StatsSnapshot;
use std::sync::Arc;
use std::time::Duration;

pub mod jobs;
pub mod requests;

pub use jobs::JobHarness;
pub use requests::RequestHarness;

/// An [`Rqq`] paired with the virtual clock it runs on
pub struct Simulation {
    rqq: Rqq,
    clock: Arc<VirtualClock>,
}

impl Simulation {
    /// Create a simulation starting at time zero.
    pub fn new(config: RqqConfig, invoker: impl Invoker + 'static) -> RqqResult<Self> {
        let clock = Arc::new(VirtualClock::new());
        let rqq = Rqq::with_clock(config, invoker, clock.clone())?;
        Ok(Self { rqq, clock })
    }

    /// Advance `seconds` one second at a time, ticking twice per second.
    pub async fn pass_time(&self, seconds: u64) {
        for _ in 0..seconds {
            self.clock.advance(1u64.secs());
            self.rqq.tick().await;
            self.rqq.tick().await;
        }
    }

    /// Advance `minutes` and tick once, repeated `times` times.
    pub async fn pass_time_minutes(&self, minutes: u64, times: u64) {
        for _ in 0..times {
            self.clock.advance((minutes * 60).secs());
            self.rqq.tick().await;
        }
    }

    /// The scheduler under test
    pub fn rqq(&self) -> &Rqq {
        &self.rqq
    }

    /// Current simulated time
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Current statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.rqq.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageRegistry;

    #[tokio::test]
    async fn test_time_helpers_move_the_clock() {
        let sim = Simulation::new(RqqConfig::testing(), StageRegistry::new()).unwrap();

        sim.pass_time(3).await;
        assert_eq!(sim.now(), Duration::from_secs(3));

        sim.pass_time_minutes(5, 2).await;
        assert_eq!(sim.now(), Duration::from_secs(603));
    }
}
