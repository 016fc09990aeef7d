//! Work item definitions.

use crate::core::pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Caller-supplied identifier of a work item
pub type ItemId = u64;

/// Status of an item in the queue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// Item is waiting to be dispatched (ready or delayed)
    Pending,
    /// Item occupies a worker slot
    InFlight,
    /// Every stage completed successfully
    Done,
    /// Item will never be retried again
    Dropped,
}

impl ItemStatus {
    /// Whether the status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Dropped)
    }
}

/// Position of an item inside its pipeline.
///
/// The attempt counter lives inside the active state so that advancing a
/// stage cannot leak retry bookkeeping into the next one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StageState {
    /// Working on stage `index`, `attempt` dispatches made in this stage
    Active {
        /// Zero-based stage index
        index: usize,
        /// Dispatches made within this stage
        attempt: u32,
    },
    /// Past the final stage
    Complete,
}

impl StageState {
    /// Initial state of every admitted item
    pub fn initial() -> Self {
        StageState::Active {
            index: 0,
            attempt: 0,
        }
    }
}

/// Admission request for a new item
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Identifier, unique among active items
    pub id: ItemId,
    /// Larger is more urgent
    pub priority: i64,
    /// Opaque data handed to every stage
    pub payload: serde_json::Value,
    /// Stages the item runs through
    pub pipeline: Pipeline,
}

impl NewItem {
    /// Create an admission request for the given pipeline.
    pub fn new(id: ItemId, pipeline: Pipeline) -> Self {
        Self {
            id,
            priority: 0,
            payload: serde_json::Value::Null,
            pipeline,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Internal representation of an item in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Item identifier
    pub id: ItemId,
    /// Scheduling priority
    pub priority: i64,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// Declared stages
    pub pipeline: Pipeline,
    /// Current stage and per-stage attempt count
    pub state: StageState,
    /// Output of the previous stage
    pub carried: Option<serde_json::Value>,
    /// Must not be dispatched before this instant
    pub next_eligible_at: Duration,
    /// Current status
    pub status: ItemStatus,
    /// Admission sequence number, used as FIFO tie-breaker
    pub seq: u64,
    /// When the item was admitted
    pub admitted_at: Duration,
    /// Dispatches across all stages
    pub total_attempts: u32,
}

impl WorkItem {
    pub(crate) fn from_new(new: NewItem, seq: u64, now: Duration) -> Self {
        Self {
            id: new.id,
            priority: new.priority,
            payload: new.payload,
            pipeline: new.pipeline,
            state: StageState::initial(),
            carried: None,
            next_eligible_at: now,
            status: ItemStatus::Pending,
            seq,
            admitted_at: now,
            total_attempts: 0,
        }
    }

    /// Index of the current stage (the stage count once complete)
    pub fn stage_index(&self) -> usize {
        match self.state {
            StageState::Active { index, .. } => index,
            StageState::Complete => self.pipeline.len(),
        }
    }

    /// Dispatches made within the current stage
    pub fn attempt(&self) -> u32 {
        match self.state {
            StageState::Active { attempt, .. } => attempt,
            StageState::Complete => 0,
        }
    }

    /// Name of the current stage
    pub fn current_stage(&self) -> Option<&str> {
        match self.state {
            StageState::Active { index, .. } => self.pipeline.stage(index),
            StageState::Complete => None,
        }
    }
}
