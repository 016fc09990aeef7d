//! The RQQ scheduler and its facade.
//!
//! [`Rqq`] owns a [`Dispatcher`] behind a lock, a shared [`Statistics`] block
//! and a [`Clock`]. Callers either drive it by hand with [`Rqq::tick`] /
//! [`Rqq::tick_at`] or start the real-clock driver with [`Rqq::start`].

use crate::clock::{Clock, SystemClock};
use crate::config::{DurationExt, RqqConfig};
use crate::error::{RqqError, RqqResult};
use crate::item::{ItemId, ItemStatus, NewItem};
use crate::queue::QueueStats;
use crate::stats::{Statistics, StatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub mod commit;
pub mod dispatcher;
pub mod invoker;
pub mod pipeline;
pub mod retry;

pub use commit::{CompletedItem, DropReason, Outcome, OutcomeRecord};
pub use dispatcher::{Dispatcher, TickReport};
pub use invoker::{FnHandler, Invoker, StageHandler, StageInput, StageRegistry, StageStats};
pub use pipeline::{Pipeline, Transition, next_transition};
pub use retry::RetryDecision;

/// The retryable queue with quota.
///
/// Terminal outcomes are kept in memory until [`Rqq::reset`]. Long-running
/// schedulers should reset periodically or the outcome history keeps growing.
///
/// # Examples
///
/// ```rust
/// use rqq::prelude::*;
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> RqqResult<()> {
///     let registry = StageRegistry::new()
///         .with_fn("request", |input| async move { Ok(json!(input.item_id)) });
///     let rqq = Rqq::new(RqqConfig::default(), registry)?;
///
///     rqq.admit(NewItem::new(1, Pipeline::single("request"))).await?;
///     rqq.tick().await;
///
///     assert_eq!(rqq.stats().total_processed, 1);
///     Ok(())
/// }
/// ```
pub struct Rqq {
    dispatcher: Arc<Mutex<Dispatcher>>,
    stats: Arc<Statistics>,
    clock: Arc<dyn Clock>,
    config: RqqConfig,
    is_running: Arc<AtomicBool>,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Rqq {
    /// Create a scheduler on the system clock.
    pub fn new(config: RqqConfig, invoker: impl Invoker + 'static) -> RqqResult<Self> {
        Self::with_clock(config, invoker, Arc::new(SystemClock::new()))
    }

    /// Create a scheduler on a custom clock.
    pub fn with_clock(
        config: RqqConfig,
        invoker: impl Invoker + 'static,
        clock: Arc<dyn Clock>,
    ) -> RqqResult<Self> {
        config
            .validate()
            .map_err(|errors| RqqError::config(errors.join("; ")))?;

        let stats = Arc::new(Statistics::new());
        let dispatcher = Dispatcher::new(&config, Arc::new(invoker), Arc::clone(&stats));

        tracing::debug!(
            "RQQ created (concurrency {}, {} attempts per stage)",
            config.dispatcher.concurrency_limit,
            config.retry.max_attempts
        );

        Ok(Self {
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            stats,
            clock,
            config,
            is_running: Arc::new(AtomicBool::new(false)),
            driver: std::sync::Mutex::new(None),
        })
    }

    /// Admit an item, eligible immediately.
    ///
    /// Fails with [`RqqError::DuplicateId`] if an item with the same id is
    /// still active and with [`RqqError::QueueFull`] at capacity.
    pub async fn admit(&self, item: NewItem) -> RqqResult<ItemId> {
        let now = self.clock.now();
        self.dispatcher.lock().await.admit(item, now)
    }

    /// Run one scheduling step at the clock's current time.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(self.clock.now()).await
    }

    /// Run one scheduling step at an explicit time.
    ///
    /// `now` should not go backwards. An earlier time only delays work: items
    /// whose eligibility lies after `now` stay queued.
    pub async fn tick_at(&self, now: Duration) -> TickReport {
        self.dispatcher.lock().await.tick(now)
    }

    /// Current statistics. Never waits for a running tick.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Get queue statistics.
    pub async fn queue_stats(&self) -> QueueStats {
        self.dispatcher.lock().await.queue_stats()
    }

    /// Status of an item, or `None` if it was never admitted (or reset away).
    pub async fn status(&self, id: ItemId) -> Option<ItemStatus> {
        self.dispatcher.lock().await.status(id)
    }

    /// Terminal record of an item.
    ///
    /// Terminal records are retained without bound until [`reset`](Self::reset).
    pub async fn outcome(&self, id: ItemId) -> Option<OutcomeRecord> {
        self.dispatcher.lock().await.outcome(id).cloned()
    }

    /// Outputs of completed items in commit order, since the last reset.
    pub async fn completed(&self) -> Vec<CompletedItem> {
        self.dispatcher.lock().await.completed().to_vec()
    }

    /// Records of dropped items in commit order, since the last reset.
    pub async fn dropped_items(&self) -> Vec<OutcomeRecord> {
        self.dispatcher.lock().await.dropped().to_vec()
    }

    /// Forget every item and zero every counter.
    ///
    /// In-flight invocations are abandoned without an outcome.
    pub async fn reset(&self) {
        self.dispatcher.lock().await.reset();
    }

    /// Start ticking on the configured interval.
    pub async fn start(&self) -> RqqResult<()> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RqqError::AlreadyRunning);
        }

        let period = self.config.dispatcher.tick_interval_ms.millis();
        let dispatcher = Arc::clone(&self.dispatcher);
        let clock = Arc::clone(&self.clock);
        let is_running = Arc::clone(&self.is_running);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while is_running.load(Ordering::SeqCst) {
                interval.tick().await;
                let now = clock.now();
                dispatcher.lock().await.tick(now);
            }
            tracing::debug!("RQQ driver loop exited");
        });

        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!("RQQ driver started (tick every {:?})", period);
        Ok(())
    }

    /// Stop the driver. Items stay where they are.
    pub async fn stop(&self) -> RqqResult<()> {
        if self
            .is_running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RqqError::NotRunning);
        }

        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!("RQQ driver task failed: {}", e);
                }
            }
        }

        tracing::info!("RQQ driver stopped");
        Ok(())
    }

    /// Check if the driver is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Get the configuration used by this scheduler.
    pub fn config(&self) -> &RqqConfig {
        &self.config
    }

    /// Current scheduler time
    pub fn now(&self) -> Duration {
        self.clock.now()
    }
}

impl Drop for Rqq {
    fn drop(&mut self) {
        if self.is_running.swap(false, Ordering::SeqCst) {
            tracing::warn!("RQQ dropped while its driver was running. Call stop() explicitly.");
            if let Some(handle) = self
                .driver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                handle.abort();
            }
        }
    }
}
