//! The RQQ dispatcher - one scheduling decision per tick.
//!
//! A tick:
//! - opens a new stats window
//! - promotes delayed items whose backoff has elapsed
//! - admits ready items up to the free worker budget and launches one
//!   invocation each
//! - polls every in-flight invocation once, in launch order, and routes the
//!   resolved ones through the pipeline state machine
//!
//! Invocations that are still pending stay in flight and are polled again on
//! the next tick. The dispatcher never reads a clock: `now` is always supplied
//! by the caller.

use crate::config::{DispatcherConfig, RetryPolicy, RqqConfig};
use crate::core::commit::{CompletedItem, Ledger, Outcome, OutcomeRecord};
use crate::core::invoker::{Invoker, StageInput};
use crate::core::pipeline::{Transition, next_transition};
use crate::error::{RqqError, RqqResult};
use crate::item::{ItemId, ItemStatus, NewItem};
use crate::queue::{InMemoryQueue, QueueStats};
use crate::stats::Statistics;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Scheduler time of the tick
    pub now: Duration,
    /// Delayed items that became ready
    pub promoted: usize,
    /// Invocations launched
    pub dispatched: usize,
    /// Invocations that resolved
    pub resolved: usize,
    /// Items that moved to their next stage
    pub advanced: usize,
    /// Items that completed their final stage
    pub completed: usize,
    /// Items requeued for another attempt
    pub retried: usize,
    /// Items dropped
    pub dropped: usize,
}

impl TickReport {
    /// Whether the tick changed anything
    pub fn is_idle(&self) -> bool {
        self.promoted == 0 && self.dispatched == 0 && self.resolved == 0
    }
}

/// One invocation occupying a worker slot
struct Invocation {
    item_id: ItemId,
    stage_index: usize,
    launched_at: Duration,
    future: BoxFuture<'static, RqqResult<serde_json::Value>>,
}

/// Concurrency-limited scheduling loop
pub struct Dispatcher {
    config: DispatcherConfig,
    policy: RetryPolicy,
    queue: InMemoryQueue,
    invoker: Arc<dyn Invoker>,
    in_flight: Vec<Invocation>,
    ledger: Ledger,
    stats: Arc<Statistics>,
    ticks: u64,
}

impl Dispatcher {
    /// Create a dispatcher writing its counters into `stats`
    pub fn new(config: &RqqConfig, invoker: Arc<dyn Invoker>, stats: Arc<Statistics>) -> Self {
        Self {
            config: config.dispatcher.clone(),
            policy: config.retry.clone(),
            queue: InMemoryQueue::with_max_size(config.dispatcher.max_queue_size),
            invoker,
            in_flight: Vec::with_capacity(config.dispatcher.concurrency_limit),
            ledger: Ledger::new(Arc::clone(&stats)),
            stats,
            ticks: 0,
        }
    }

    /// Admit a new item, eligible at `now`.
    pub fn admit(&mut self, new: NewItem, now: Duration) -> RqqResult<ItemId> {
        let id = self.queue.admit(new, now)?;
        self.stats.item_admitted();
        Ok(id)
    }

    /// Run one scheduling step at `now`.
    pub fn tick(&mut self, now: Duration) -> TickReport {
        self.ticks += 1;
        self.stats.begin_window();

        let mut report = TickReport {
            now,
            ..Default::default()
        };

        report.promoted = self.queue.promote_due(now);

        let available = self
            .config
            .concurrency_limit
            .saturating_sub(self.in_flight.len());
        if available > 0 {
            for input in self.queue.next_ready(available, now) {
                self.launch(input, now);
                report.dispatched += 1;
            }
        }

        self.poll_in_flight(now, &mut report);

        if !report.is_idle() {
            tracing::debug!(
                "Tick {} at {:?}: dispatched {} resolved {} (done {} retry {} drop {}), {} in flight",
                self.ticks,
                now,
                report.dispatched,
                report.resolved,
                report.completed,
                report.retried,
                report.dropped,
                self.in_flight.len()
            );
        }

        report
    }

    fn launch(&mut self, input: StageInput, now: Duration) {
        let invoker = Arc::clone(&self.invoker);
        let item_id = input.item_id;
        let stage_index = input.stage_index;

        tracing::debug!(
            "Dispatching item {} stage {} attempt {}",
            item_id,
            input.stage,
            input.attempt
        );

        // A panicking work function never reached its commit boundary
        let future = AssertUnwindSafe(async move { invoker.invoke(input).await })
            .catch_unwind()
            .map(|outcome| {
                outcome.unwrap_or_else(|panic| {
                    Err(RqqError::terminal(format!(
                        "work function panicked: {}",
                        panic_message(&*panic)
                    )))
                })
            })
            .boxed();

        self.stats.invocation_started();
        self.in_flight.push(Invocation {
            item_id,
            stage_index,
            launched_at: now,
            future,
        });
    }

    fn poll_in_flight(&mut self, now: Duration, report: &mut TickReport) {
        let mut still_running = Vec::with_capacity(self.in_flight.len());

        for mut invocation in std::mem::take(&mut self.in_flight) {
            match invocation.future.as_mut().now_or_never() {
                Some(result) => {
                    self.stats.invocation_finished();
                    report.resolved += 1;
                    tracing::trace!(
                        "Item {} stage {} resolved after {:?}",
                        invocation.item_id,
                        invocation.stage_index,
                        now.saturating_sub(invocation.launched_at)
                    );
                    self.route(invocation.item_id, result, now, report);
                }
                None => still_running.push(invocation),
            }
        }

        self.in_flight = still_running;
    }

    fn route(
        &mut self,
        id: ItemId,
        result: RqqResult<serde_json::Value>,
        now: Duration,
        report: &mut TickReport,
    ) {
        let Some(item) = self.queue.get(id) else {
            tracing::warn!("Resolved invocation for unknown item {}", id);
            return;
        };

        let transition = match result {
            Ok(output) => next_transition(item, Ok(output), &self.policy),
            Err(error) => {
                self.stats.attempt_failed();
                tracing::warn!(
                    "Item {} failed at stage {} (attempt {}/{}): {}",
                    id,
                    item.stage_index(),
                    item.attempt(),
                    self.policy.max_attempts,
                    error
                );
                next_transition(item, Err(&error), &self.policy)
            }
        };

        match transition {
            Transition::Advance { next_index, output } => {
                match self.queue.advance(id, next_index, output, now) {
                    Ok(()) => report.advanced += 1,
                    Err(e) => tracing::error!("Failed to advance item {}: {}", id, e),
                }
            }
            Transition::Retry { delay } => match self.queue.requeue(id, delay, now) {
                Ok(()) => report.retried += 1,
                Err(e) => tracing::error!("Failed to requeue item {}: {}", id, e),
            },
            Transition::Complete { output } => {
                self.finish(id, Outcome::Done { output }, now);
                report.completed += 1;
            }
            Transition::Drop { reason } => {
                self.finish(id, Outcome::Dropped { reason }, now);
                report.dropped += 1;
            }
        }
    }

    fn finish(&mut self, id: ItemId, outcome: Outcome, now: Duration) {
        if let Some(item) = self.queue.remove(id) {
            self.ledger.guard(item, now).commit(outcome);
        }
    }

    /// Clear items, in-flight invocations, records and counters.
    pub fn reset(&mut self) {
        let abandoned = self.in_flight.len();
        self.in_flight.clear();
        let purged = self.queue.purge();
        self.ledger.clear();
        self.stats.reset();
        self.ticks = 0;

        tracing::info!(
            "Dispatcher reset ({} items purged, {} invocations abandoned)",
            purged,
            abandoned
        );
    }

    /// Status of an item, live or terminal
    pub fn status(&self, id: ItemId) -> Option<ItemStatus> {
        self.queue
            .status(id)
            .or_else(|| self.ledger.get(id).map(OutcomeRecord::status))
    }

    /// Terminal record of an item
    pub fn outcome(&self, id: ItemId) -> Option<&OutcomeRecord> {
        self.ledger.get(id)
    }

    /// Successful outputs in commit order
    pub fn completed(&self) -> &[CompletedItem] {
        self.ledger.completed()
    }

    /// Dropped items in commit order
    pub fn dropped(&self) -> &[OutcomeRecord] {
        self.ledger.dropped()
    }

    /// Get queue statistics
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Number of invocations occupying a worker slot
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Ticks since creation or the last reset
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Shared statistics
    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("queue", &self.queue.stats())
            .field("in_flight", &self.in_flight.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
