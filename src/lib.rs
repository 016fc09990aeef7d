//! # RQQ
//!
//! A retryable queue with quota: a tick-driven priority scheduler that runs
//! work items through ordered stage pipelines under a concurrency cap, with
//! bounded per-stage retries and linear backoff.
//!
//! ## Features
//!
//! - **Priority dispatch**: higher priority first, FIFO among equals
//! - **Concurrency quota**: never more than `concurrency_limit` invocations in flight
//! - **Bounded retries**: linear backoff between a minimum and maximum delay
//! - **Pipelines**: each stage receives the previous stage's output
//! - **Exactly-once terminal accounting**: every item is counted as processed
//!   or dropped exactly once, even when its work function panics
//! - **Deterministic time**: drive ticks by hand on a virtual clock, or start
//!   the interval driver on the system clock
//!
//! ## Quick Start
//!
//! ```rust
//! use rqq::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> RqqResult<()> {
//!     let registry = StageRegistry::new()
//!         .with_fn("fetch", |input| async move { Ok(json!(input.item_id)) })
//!         .with_fn("store", |input| async move {
//!             Ok(json!(format!("stored {}", input.carried.unwrap_or_default())))
//!         });
//!
//!     let rqq = Rqq::new(RqqConfig::default(), registry)?;
//!     let pipeline = Pipeline::new(["fetch", "store"])?;
//!     rqq.admit(NewItem::new(7, pipeline).with_priority(100)).await?;
//!
//!     rqq.tick().await; // fetch
//!     rqq.tick().await; // store
//!
//!     assert_eq!(rqq.completed().await[0].output, json!("stored 7"));
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod harness;
pub mod item;
pub mod logging;
pub mod queue;
pub mod stats;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

pub mod prelude {
    pub use crate::clock::{Clock, SystemClock, VirtualClock};
    pub use crate::config::*;
    pub use crate::core::{
        CompletedItem, DropReason, Invoker, Outcome, OutcomeRecord, Pipeline, Rqq,
        StageHandler, StageInput, StageRegistry, TickReport,
    };
    pub use crate::error::{RqqError, RqqResult};
    pub use crate::item::{ItemId, ItemStatus, NewItem};
    pub use crate::stats::StatsSnapshot;
    pub use async_trait::async_trait;

    #[cfg(feature = "metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    pub use crate::metrics::RqqMetrics;
}

pub use crate::config::*;
pub use crate::core::{Invoker, Pipeline, Rqq, StageRegistry};
pub use crate::error::{RqqError, RqqResult};
pub use crate::item::{ItemId, ItemStatus, NewItem};
pub use crate::stats::StatsSnapshot;
pub use async_trait::async_trait;
