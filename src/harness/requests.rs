//! Single-stage request harness.

use super::Simulation;
use crate::config::RqqConfig;
use crate::core::{Pipeline, StageInput, StageRegistry};
use crate::error::{RqqError, RqqResult};
use crate::item::{ItemId, NewItem};
use crate::stats::StatsSnapshot;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const REQUEST_STAGE: &str = "request";
const TRAP_STAGE: &str = "trap";
const BULK_BASE_ID: ItemId = 1_000_000;

#[derive(Debug, Clone, Copy)]
struct Script {
    should_fail: bool,
    fail_count: u32,
    calls: u32,
}

type Scripts = Arc<Mutex<HashMap<ItemId, Script>>>;

/// Requests whose handler fails a scripted number of times.
///
/// ```rust
/// use rqq::harness::RequestHarness;
///
/// # #[tokio::main]
/// # async fn main() -> rqq::RqqResult<()> {
/// let harness = RequestHarness::new()?;
/// harness.add_request(1, "hello", 100, false, 0).await?;
/// harness.pass_time(10).await;
/// assert_eq!(harness.processed_requests().await, vec![1]);
/// # Ok(())
/// # }
/// ```
pub struct RequestHarness {
    sim: Simulation,
    scripts: Scripts,
    next_bulk_id: Mutex<ItemId>,
}

impl RequestHarness {
    /// Harness on the testing configuration.
    pub fn new() -> RqqResult<Self> {
        Self::with_config(RqqConfig::testing())
    }

    pub fn with_config(config: RqqConfig) -> RqqResult<Self> {
        let scripts: Scripts = Arc::default();

        let script_view = Arc::clone(&scripts);
        let registry = StageRegistry::new()
            .with_fn(REQUEST_STAGE, move |input: StageInput| {
                let verdict = run_script(&script_view, input.item_id);
                async move { verdict }
            })
            .with_fn(TRAP_STAGE, |input: StageInput| async move {
                Err(RqqError::terminal(format!(
                    "request {} trapped before commit",
                    input.item_id
                )))
            });

        Ok(Self {
            sim: Simulation::new(config, registry)?,
            scripts,
            next_bulk_id: Mutex::new(BULK_BASE_ID),
        })
    }

    /// Forget all requests, scripts and counters.
    pub async fn reset(&self) {
        self.sim.rqq().reset().await;
        lock(&self.scripts).clear();
        *self
            .next_bulk_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = BULK_BASE_ID;
    }

    /// Admit a request. With `should_fail` its first `fail_count` calls fail.
    ///
    /// The script is in place before the request becomes visible to a tick.
    /// A rejected request leaves any earlier script for the same id untouched.
    pub async fn add_request(
        &self,
        id: ItemId,
        data: &str,
        priority: i64,
        should_fail: bool,
        fail_count: u32,
    ) -> RqqResult<ItemId> {
        let previous = lock(&self.scripts).insert(
            id,
            Script {
                should_fail,
                fail_count,
                calls: 0,
            },
        );

        let item = NewItem::new(id, Pipeline::single(REQUEST_STAGE))
            .with_priority(priority)
            .with_payload(json!(data));
        if let Err(e) = self.sim.rqq().admit(item).await {
            let mut scripts = lock(&self.scripts);
            match previous {
                Some(script) => scripts.insert(id, script),
                None => scripts.remove(&id),
            };
            return Err(e);
        }
        Ok(id)
    }

    /// Admit `count` requests that fail before their commit boundary.
    pub async fn add_many(&self, count: u64) -> RqqResult<Vec<ItemId>> {
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = {
                let mut next = self
                    .next_bulk_id
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                *next += 1;
                *next
            };
            let item = NewItem::new(id, Pipeline::single(TRAP_STAGE)).with_priority(100);
            ids.push(self.sim.rqq().admit(item).await?);
        }
        Ok(ids)
    }

    /// Ids of processed requests in completion order.
    pub async fn processed_requests(&self) -> Vec<ItemId> {
        self.sim
            .rqq()
            .completed()
            .await
            .into_iter()
            .map(|done| done.id)
            .collect()
    }

    /// Number of dropped single-stage requests
    pub async fn dropped_requests(&self) -> u64 {
        self.sim
            .rqq()
            .dropped_items()
            .await
            .iter()
            .filter(|record| record.stage_count == 1)
            .count() as u64
    }

    /// Invocations issued since the last reset
    pub fn dispatch_call_count(&self) -> u64 {
        self.sim.stats().dispatch_calls
    }

    /// Calls the handler received for `id`
    pub fn calls_for(&self, id: ItemId) -> u32 {
        lock(&self.scripts).get(&id).map_or(0, |s| s.calls)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.sim.stats()
    }

    pub async fn pass_time(&self, seconds: u64) {
        self.sim.pass_time(seconds).await;
    }

    pub async fn pass_time_minutes(&self, minutes: u64, times: u64) {
        self.sim.pass_time_minutes(minutes, times).await;
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }
}

fn lock(scripts: &Scripts) -> std::sync::MutexGuard<'_, HashMap<ItemId, Script>> {
    scripts.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_script(scripts: &Scripts, id: ItemId) -> RqqResult<serde_json::Value> {
    let mut scripts = lock(scripts);
    let script = scripts.entry(id).or_insert(Script {
        should_fail: false,
        fail_count: 0,
        calls: 0,
    });
    script.calls += 1;

    if script.should_fail && script.calls <= script.fail_count {
        Err(RqqError::invocation(format!(
            "request {} failed (call {} of {} scripted failures)",
            id, script.calls, script.fail_count
        )))
    } else {
        Ok(json!(id))
    }
}
