//! Work item store and priority queue.
//!
//! The store keeps every active item together with three scheduling
//! structures:
//! - **ready**: eligible items ordered by priority, then admission order
//! - **delayed**: items waiting out a backoff delay, ordered by eligibility time
//! - **in-flight**: items currently occupying a worker slot
//!
//! An active item lives in exactly one of them.
//!
//! # Examples
//!
//! ```rust
//! use rqq::core::pipeline::Pipeline;
//! use rqq::item::NewItem;
//! use rqq::queue::InMemoryQueue;
//! use std::time::Duration;
//!
//! let mut queue = InMemoryQueue::new();
//! let now = Duration::ZERO;
//! queue.admit(NewItem::new(1, Pipeline::single("request")).with_priority(50), now)?;
//! queue.admit(NewItem::new(2, Pipeline::single("request")).with_priority(200), now)?;
//!
//! let batch = queue.next_ready(1, now);
//! assert_eq!(batch[0].item_id, 2);
//! # Ok::<(), rqq::RqqError>(())
//! ```

use crate::item::ItemId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub mod memory;
pub use memory::InMemoryQueue;

/// Statistics about the queue state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Items eligible for dispatch now
    pub ready: u64,
    /// Items waiting out a delay
    pub delayed: u64,
    /// Items occupying a worker slot
    pub in_flight: u64,
    /// All non-terminal items
    pub active: u64,
}

/// Entry of the ready ordering.
///
/// Max-heap order: higher priority first, then lower admission sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadyEntry {
    pub(crate) priority: i64,
    pub(crate) seq: u64,
    pub(crate) id: ItemId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
