//! Terminal bookkeeping.
//!
//! Every item leaves the scheduler through [`Ledger::guard`]. The returned
//! [`FinallyGuard`] owns the item that was removed from the store, so a
//! terminal outcome can be recorded at most once. A guard dropped without an
//! explicit commit still records the item, as abandoned.

use crate::item::{ItemId, ItemStatus, StageState, WorkItem};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Why an item was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// The retry budget of a stage ran out
    Exhausted {
        /// Stage index the item was stuck on
        stage: usize,
        /// Attempts made on that stage
        attempts: u32,
    },
    /// The work function failed before its commit boundary
    Terminal {
        /// Failure message
        message: String,
    },
    /// Bookkeeping was interrupted before an outcome was chosen
    Abandoned,
}

/// Terminal outcome of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// Every stage succeeded
    Done {
        /// Output of the final stage
        output: serde_json::Value,
    },
    /// The item will never run again
    Dropped {
        /// Why it was dropped
        reason: DropReason,
    },
}

/// Record kept for an item after it left the live scheduling structures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Item identifier
    pub id: ItemId,
    /// What happened
    pub outcome: Outcome,
    /// Stage index reached
    pub stage: usize,
    /// Number of declared stages
    pub stage_count: usize,
    /// Dispatches across all stages
    pub attempts: u32,
    /// Scheduler time of the commit
    pub committed_at: Duration,
}

impl OutcomeRecord {
    /// Terminal status implied by the outcome
    pub fn status(&self) -> ItemStatus {
        match self.outcome {
            Outcome::Done { .. } => ItemStatus::Done,
            Outcome::Dropped { .. } => ItemStatus::Dropped,
        }
    }
}

/// Successful terminal output, in commit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedItem {
    /// Item identifier
    pub id: ItemId,
    /// Output of the final stage
    pub output: serde_json::Value,
}

/// Terminal records and the counters they drive
///
/// Records, completions and drops are kept for every item ever committed.
/// Nothing is evicted, so memory grows with throughput until `reset`.
#[derive(Debug)]
pub(crate) struct Ledger {
    stats: Arc<Statistics>,
    records: HashMap<ItemId, OutcomeRecord>,
    completed: Vec<CompletedItem>,
    dropped: Vec<OutcomeRecord>,
}

impl Ledger {
    pub(crate) fn new(stats: Arc<Statistics>) -> Self {
        Self {
            stats,
            records: HashMap::new(),
            completed: Vec::new(),
            dropped: Vec::new(),
        }
    }

    /// Take ownership of an item removed from the store.
    pub(crate) fn guard(&mut self, item: WorkItem, now: Duration) -> FinallyGuard<'_> {
        FinallyGuard {
            ledger: self,
            item: Some(item),
            now,
        }
    }

    fn record(&mut self, mut item: WorkItem, outcome: Outcome, now: Duration) {
        let stage = item.stage_index();
        let record = OutcomeRecord {
            id: item.id,
            outcome: outcome.clone(),
            stage,
            stage_count: item.pipeline.len(),
            attempts: item.total_attempts,
            committed_at: now,
        };

        match outcome {
            Outcome::Done { output } => {
                item.status = ItemStatus::Done;
                item.state = StageState::Complete;
                self.stats.item_processed();
                self.completed.push(CompletedItem {
                    id: item.id,
                    output,
                });
                tracing::debug!(
                    "Item {} done after {} attempts",
                    item.id,
                    item.total_attempts
                );
            }
            Outcome::Dropped { reason } => {
                item.status = ItemStatus::Dropped;
                self.stats.item_dropped();
                self.dropped.push(record.clone());
                tracing::error!(
                    "Item {} dropped at stage {} after {} attempts: {:?}",
                    item.id,
                    stage,
                    item.total_attempts,
                    reason
                );
            }
        }

        self.records.insert(item.id, record);
    }

    pub(crate) fn get(&self, id: ItemId) -> Option<&OutcomeRecord> {
        self.records.get(&id)
    }

    pub(crate) fn completed(&self) -> &[CompletedItem] {
        &self.completed
    }

    pub(crate) fn dropped(&self) -> &[OutcomeRecord] {
        &self.dropped
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.completed.clear();
        self.dropped.clear();
    }
}

/// Exclusive handle on an item's terminal transition
#[derive(Debug)]
pub(crate) struct FinallyGuard<'a> {
    ledger: &'a mut Ledger,
    item: Option<WorkItem>,
    now: Duration,
}

impl FinallyGuard<'_> {
    /// Record the outcome; consumes the guard.
    pub(crate) fn commit(mut self, outcome: Outcome) {
        if let Some(item) = self.item.take() {
            self.ledger.record(item, outcome, self.now);
        }
    }
}

impl Drop for FinallyGuard<'_> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            tracing::warn!("Item {} left the scheduler without an outcome", item.id);
            self.ledger.record(
                item,
                Outcome::Dropped {
                    reason: DropReason::Abandoned,
                },
                self.now,
            );
        }
    }
}
