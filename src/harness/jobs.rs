//! Three-stage job workflow harness.
//!
//! Each job walks `get_data -> do_work -> post_work`. Every stage fails on its
//! first call for a given job and succeeds on the next one, so a job needs
//! six invocations and three backoff delays to finish.
//!
//! Bulk tasks run a single `bulk_task` stage that also fails once, so each
//! bulk task costs exactly one error and two invocations.

use super::Simulation;
use crate::config::RqqConfig;
use crate::core::{Pipeline, StageInput, StageRegistry};
use crate::error::{RqqError, RqqResult};
use crate::item::{ItemId, NewItem};
use crate::stats::StatsSnapshot;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

pub const GET_DATA: &str = "get_data";
pub const DO_WORK: &str = "do_work";
pub const POST_WORK: &str = "post_work";
pub const BULK_TASK: &str = "bulk_task";

/// Tasks loaded by [`JobHarness::add_many_tasks`]
pub const DEFAULT_BULK_TASKS: u64 = 3000;

const BULK_BASE_ID: ItemId = 1_000_000;

type FailedOnce = Arc<Mutex<HashSet<(ItemId, &'static str)>>>;

/// Drives the job workflow on a virtual clock
pub struct JobHarness {
    sim: Simulation,
    failed_once: FailedOnce,
}

impl JobHarness {
    /// Harness on the testing configuration.
    pub fn new() -> RqqResult<Self> {
        Self::with_config(RqqConfig::testing())
    }

    pub fn with_config(config: RqqConfig) -> RqqResult<Self> {
        let failed_once: FailedOnce = Arc::default();

        let registry = StageRegistry::new()
            .with_fn(GET_DATA, {
                let failed_once = Arc::clone(&failed_once);
                move |input: StageInput| {
                    let result = fail_first(&failed_once, input.item_id, GET_DATA)
                        .map(|()| json!(input.item_id));
                    async move { result }
                }
            })
            .with_fn(DO_WORK, {
                let failed_once = Arc::clone(&failed_once);
                move |input: StageInput| {
                    let result = fail_first(&failed_once, input.item_id, DO_WORK)
                        .and_then(|()| carried_id(&input))
                        .map(|id| json!(id));
                    async move { result }
                }
            })
            .with_fn(POST_WORK, {
                let failed_once = Arc::clone(&failed_once);
                move |input: StageInput| {
                    let result = fail_first(&failed_once, input.item_id, POST_WORK)
                        .and_then(|()| carried_id(&input))
                        .map(|id| json!(format!("Postwork here {id}")));
                    async move { result }
                }
            })
            .with_fn(BULK_TASK, {
                let failed_once = Arc::clone(&failed_once);
                move |input: StageInput| {
                    let result = fail_first(&failed_once, input.item_id, BULK_TASK)
                        .map(|()| json!(input.item_id));
                    async move { result }
                }
            });

        Ok(Self {
            sim: Simulation::new(config, registry)?,
            failed_once,
        })
    }

    /// Forget all jobs and counters.
    pub async fn reset(&self) {
        self.sim.rqq().reset().await;
        self.failed_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Start the workflow for job `id`.
    pub async fn add_job(&self, id: ItemId, priority: i64) -> RqqResult<ItemId> {
        let workflow = Pipeline::new([GET_DATA, DO_WORK, POST_WORK])?;
        let item = NewItem::new(id, workflow)
            .with_priority(priority)
            .with_payload(json!({ "job": id }));
        self.sim.rqq().admit(item).await
    }

    /// Bulk-load [`DEFAULT_BULK_TASKS`] tasks.
    pub async fn add_many_tasks(&self) -> RqqResult<u64> {
        self.add_tasks(DEFAULT_BULK_TASKS).await
    }

    /// Bulk-load `count` single-stage tasks with ids above the regular range.
    ///
    /// Each task fails on its first call and succeeds on the retry. Bulk
    /// outputs are numeric, so they never show up in [`done_jobs`](Self::done_jobs).
    pub async fn add_tasks(&self, count: u64) -> RqqResult<u64> {
        for n in 1..=count {
            let item =
                NewItem::new(BULK_BASE_ID + n, Pipeline::single(BULK_TASK)).with_priority(100);
            self.sim.rqq().admit(item).await?;
        }
        tracing::info!("Loaded {} bulk tasks", count);
        Ok(count)
    }

    /// Final outputs of completed jobs in completion order.
    pub async fn done_jobs(&self) -> Vec<String> {
        self.sim
            .rqq()
            .completed()
            .await
            .into_iter()
            .filter_map(|done| done.output.as_str().map(str::to_string))
            .collect()
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

fn fail_first(failed_once: &FailedOnce, id: ItemId, stage: &'static str) -> RqqResult<()> {
    let first_call = failed_once
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert((id, stage));
    if first_call {
        Err(RqqError::invocation(format!("{stage} of job {id} failed once")))
    } else {
        Ok(())
    }
}

fn carried_id(input: &StageInput) -> RqqResult<u64> {
    input
        .carried
        .as_ref()
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| RqqError::terminal(format!("job {} lost its id between stages", input.item_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh() -> JobHarness {
        let harness = JobHarness::new().unwrap();
        harness.reset().await;
        harness.pass_time(1).await;
        harness
    }

    #[tokio::test]
    async fn test_starts_empty() {
        let harness = fresh().await;
        assert!(harness.done_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_workflow_completes() {
        let harness = fresh().await;
        harness.add_job(1, 100).await.unwrap();
        harness.pass_time_minutes(5, 10).await;

        assert_eq!(harness.done_jobs().await, vec!["Postwork here 1"]);
        let stats = harness.stats();
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.dispatch_calls, 6);
        assert_eq!(stats.requests, 0);
    }

    #[tokio::test]
    async fn test_workflow_waits_out_backoff() {
        let harness = fresh().await;
        harness.add_job(1, 100).await.unwrap();

        harness.pass_time_minutes(1, 5).await;
        assert!(harness.done_jobs().await.is_empty());

        harness.pass_time_minutes(5, 10).await;
        assert_eq!(harness.done_jobs().await, vec!["Postwork here 1"]);
    }

    #[tokio::test]
    async fn test_bulk_tasks_fail_once_each() {
        let harness = fresh().await;
        harness.add_tasks(50).await.unwrap();
        assert_eq!(harness.stats().requests, 50);

        harness.pass_time(3000).await;
        let stats = harness.stats();
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.threads, 0);
        assert_eq!(stats.total_processed, 50);
        assert_eq!(stats.total_dropped, 0);
        assert_eq!(stats.total_errors, 50);
        assert_eq!(stats.dispatch_calls, 100);
        assert!(harness.done_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_default_bulk_load_drains() {
        let harness = fresh().await;
        let loaded = harness.add_many_tasks().await.unwrap();
        assert_eq!(loaded, DEFAULT_BULK_TASKS);

        harness.pass_time(3000).await;
        let stats = harness.stats();
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.total_processed, DEFAULT_BULK_TASKS);
        assert_eq!(stats.total_dropped, 0);
        assert_eq!(stats.total_errors, DEFAULT_BULK_TASKS);
    }
}
