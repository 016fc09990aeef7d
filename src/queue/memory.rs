//! In-memory work item store.
//!
//! All mutation happens from the tick-serialized dispatcher, so the store uses
//! plain collections and `&mut self` instead of internal locks.

use super::{QueueStats, ReadyEntry};
use crate::core::invoker::StageInput;
use crate::error::{RqqError, RqqResult};
use crate::item::{ItemId, ItemStatus, NewItem, StageState, WorkItem};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::time::Duration;

/// In-memory queue backend implementation
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    /// Active items indexed by id
    items: HashMap<ItemId, WorkItem>,
    /// Eligible items by priority
    ready: BinaryHeap<ReadyEntry>,
    /// Waiting items keyed by (eligible at, admission seq)
    delayed: BTreeMap<(Duration, u64), ItemId>,
    /// Items occupying a worker slot
    in_flight: HashSet<ItemId>,
    next_seq: u64,
    /// Capacity bound (0 = unlimited)
    max_queue_size: usize,
}

impl InMemoryQueue {
    /// Create an unbounded queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue holding at most `max_queue_size` active items (0 = unlimited)
    pub fn with_max_size(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            ..Self::default()
        }
    }

    /// Check if we're at the maximum queue size
    pub fn is_full(&self) -> bool {
        self.max_queue_size != 0 && self.items.len() >= self.max_queue_size
    }

    /// Insert a new item as pending and eligible at `now`.
    pub fn admit(&mut self, new: NewItem, now: Duration) -> RqqResult<ItemId> {
        if self.items.contains_key(&new.id) {
            return Err(RqqError::DuplicateId { id: new.id });
        }
        if self.is_full() {
            return Err(RqqError::QueueFull {
                max_size: self.max_queue_size,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let item = WorkItem::from_new(new, seq, now);
        let id = item.id;
        self.items.insert(id, item);
        self.schedule(id, now);

        tracing::debug!("Admitted item {} (seq {})", id, seq);
        Ok(id)
    }

    /// Move delayed items whose time has come into the ready ordering.
    pub fn promote_due(&mut self, now: Duration) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            if let Some(item) = self.items.get(&id) {
                self.ready.push(ReadyEntry {
                    priority: item.priority,
                    seq: item.seq,
                    id,
                });
                promoted += 1;
            }
        }
        promoted
    }

    /// Pop up to `budget` ready items, mark them in flight and count the attempt.
    ///
    /// Entries that are not yet eligible at `now` go back to the delayed set,
    /// so a `now` earlier than a previous call never dispatches early.
    pub fn next_ready(&mut self, budget: usize, now: Duration) -> Vec<StageInput> {
        self.promote_due(now);

        let mut batch = Vec::with_capacity(budget.min(self.ready.len()));
        while batch.len() < budget {
            let Some(entry) = self.ready.pop() else {
                break;
            };
            let Some(item) = self.items.get_mut(&entry.id) else {
                continue;
            };
            let StageState::Active { index, attempt } = item.state else {
                continue;
            };
            if item.next_eligible_at > now {
                self.delayed.insert((item.next_eligible_at, item.seq), item.id);
                continue;
            }

            item.state = StageState::Active {
                index,
                attempt: attempt + 1,
            };
            item.total_attempts += 1;
            item.status = ItemStatus::InFlight;
            self.in_flight.insert(item.id);

            batch.push(StageInput {
                item_id: item.id,
                stage: item.pipeline.stage(index).unwrap_or_default().to_string(),
                stage_index: index,
                attempt: attempt + 1,
                payload: item.payload.clone(),
                carried: item.carried.clone(),
            });
        }

        batch
    }

    /// Make the item pending again, eligible at `now + delay`.
    pub fn requeue(&mut self, id: ItemId, delay: Duration, now: Duration) -> RqqResult<()> {
        self.unschedule(id);
        let item = self
            .items
            .get_mut(&id)
            .ok_or(RqqError::ItemNotFound { id })?;

        item.status = ItemStatus::Pending;
        item.next_eligible_at = now + delay;
        self.schedule(id, now);

        tracing::debug!("Requeued item {} with delay: {:?}", id, delay);
        Ok(())
    }

    /// Move the item to `next_index`, resetting its attempt count and carrying
    /// the previous stage's output.
    pub fn advance(
        &mut self,
        id: ItemId,
        next_index: usize,
        output: serde_json::Value,
        now: Duration,
    ) -> RqqResult<()> {
        self.unschedule(id);
        let item = self
            .items
            .get_mut(&id)
            .ok_or(RqqError::ItemNotFound { id })?;

        item.state = StageState::Active {
            index: next_index,
            attempt: 0,
        };
        item.carried = Some(output);
        item.status = ItemStatus::Pending;
        item.next_eligible_at = now;
        self.schedule(id, now);

        tracing::debug!("Item {} advanced to stage {}", id, next_index);
        Ok(())
    }

    /// Take an item out of every structure.
    pub fn remove(&mut self, id: ItemId) -> Option<WorkItem> {
        self.unschedule(id);
        self.items.remove(&id)
    }

    /// Get an active item by id
    pub fn get(&self, id: ItemId) -> Option<&WorkItem> {
        self.items.get(&id)
    }

    /// Status of an active item
    pub fn status(&self, id: ItemId) -> Option<ItemStatus> {
        self.items.get(&id).map(|item| item.status)
    }

    /// Number of active items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no active items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            ready: self.ready.len() as u64,
            delayed: self.delayed.len() as u64,
            in_flight: self.in_flight.len() as u64,
            active: self.items.len() as u64,
        }
    }

    /// Drop every item and scheduling structure
    pub fn purge(&mut self) -> u64 {
        let purged_count = self.items.len() as u64;

        self.items.clear();
        self.ready.clear();
        self.delayed.clear();
        self.in_flight.clear();
        self.next_seq = 0;

        if purged_count > 0 {
            tracing::warn!("Purged {} items from queue", purged_count);
        }
        purged_count
    }

    fn schedule(&mut self, id: ItemId, now: Duration) {
        let Some(item) = self.items.get(&id) else {
            return;
        };

        if item.next_eligible_at <= now {
            self.ready.push(ReadyEntry {
                priority: item.priority,
                seq: item.seq,
                id,
            });
        } else {
            self.delayed.insert((item.next_eligible_at, item.seq), id);
        }
    }

    fn unschedule(&mut self, id: ItemId) {
        let Some(item) = self.items.get(&id) else {
            return;
        };

        match item.status {
            ItemStatus::InFlight => {
                self.in_flight.remove(&id);
            }
            ItemStatus::Pending => {
                if self
                    .delayed
                    .remove(&(item.next_eligible_at, item.seq))
                    .is_none()
                {
                    self.ready.retain(|entry| entry.id != id);
                }
            }
            ItemStatus::Done | ItemStatus::Dropped => {}
        }
    }
}
