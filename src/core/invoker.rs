//! Pluggable work functions.
//!
//! The scheduler only needs to know whether an invocation succeeded. It talks
//! to the outside world through the [`Invoker`] trait. [`StageRegistry`] is the
//! stock implementation: it routes each invocation to the handler registered
//! for the item's current stage and keeps per-stage statistics.
//!
//! # Examples
//!
//! ```rust
//! use rqq::prelude::*;
//! use serde_json::json;
//!
//! let registry = StageRegistry::new()
//!     .with_fn("fetch", |input| async move { Ok(json!(input.item_id)) })
//!     .with_fn("finalize", |input| async move {
//!         let id = input.carried.unwrap_or_default();
//!         Ok(json!(format!("finalized {id}")))
//!     });
//! assert!(registry.is_registered("fetch"));
//! ```

use crate::error::{RqqError, RqqResult};
use crate::item::ItemId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Everything a stage handler gets to see about one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    /// Item being worked on
    pub item_id: ItemId,
    /// Name of the current stage
    pub stage: String,
    /// Zero-based index of the current stage
    pub stage_index: usize,
    /// Attempt number within this stage, starting at 1
    pub attempt: u32,
    /// The item's opaque payload
    pub payload: serde_json::Value,
    /// Output of the previous stage, if any
    pub carried: Option<serde_json::Value>,
}

/// Capability to execute the current stage of an item.
///
/// `Ok` means the stage succeeded. `Err` with a terminal error
/// ([`RqqError::is_terminal`]) drops the item immediately; any other error is
/// retried according to the retry policy.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Execute one stage of one item.
    async fn invoke(&self, input: StageInput) -> RqqResult<serde_json::Value>;
}

/// Handler for a single named stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Run the stage.
    async fn handle(&self, input: StageInput) -> RqqResult<serde_json::Value>;
}

/// Adapter turning an async closure into a [`StageHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StageHandler for FnHandler<F>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = RqqResult<serde_json::Value>> + Send,
{
    async fn handle(&self, input: StageInput) -> RqqResult<serde_json::Value> {
        (self.f)(input).await
    }
}

/// Statistics for a registered stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Total invocations
    pub invocations: u64,
    /// Successful invocations
    pub successes: u64,
    /// Failed invocations
    pub failures: u64,
}

/// Registry of stage handlers keyed by stage name.
#[derive(Default)]
pub struct StageRegistry {
    handlers: HashMap<String, Arc<dyn StageHandler>>,
    stats: Arc<Mutex<HashMap<String, StageStats>>>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `stage`, replacing any previous one.
    pub fn register(&mut self, stage: impl Into<String>, handler: impl StageHandler + 'static) {
        let stage = stage.into();
        tracing::debug!("Registering stage handler: {}", stage);
        self.handlers.insert(stage, Arc::new(handler));
    }

    /// Builder form of [`register`](Self::register) for closures.
    pub fn with_fn<F, Fut>(mut self, stage: impl Into<String>, f: F) -> Self
    where
        F: Fn(StageInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RqqResult<serde_json::Value>> + Send + 'static,
    {
        self.register(stage, FnHandler::new(f));
        self
    }

    /// Check if a stage has a handler.
    pub fn is_registered(&self, stage: &str) -> bool {
        self.handlers.contains_key(stage)
    }

    /// All registered stage names, sorted.
    pub fn registered_stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = self.handlers.keys().cloned().collect();
        stages.sort();
        stages
    }

    /// Get statistics for a stage.
    pub fn stage_stats(&self, stage: &str) -> Option<StageStats> {
        self.lock_stats().get(stage).cloned()
    }

    /// Reset statistics for all stages.
    pub fn reset_stats(&self) {
        self.lock_stats().clear();
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, HashMap<String, StageStats>> {
        // Counters stay meaningful even if a holder panicked
        self.stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, stage: &str, ok: bool) {
        let mut stats = self.lock_stats();
        let entry = stats.entry(stage.to_string()).or_default();
        entry.invocations += 1;
        if ok {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.registered_stages())
            .finish()
    }
}

#[async_trait]
impl Invoker for StageRegistry {
    async fn invoke(&self, input: StageInput) -> RqqResult<serde_json::Value> {
        let Some(handler) = self.handlers.get(&input.stage).cloned() else {
            tracing::error!("No handler found for stage: {}", input.stage);
            self.record(&input.stage, false);
            return Err(RqqError::StageNotFound { stage: input.stage });
        };

        let stage = input.stage.clone();
        let item_id = input.item_id;
        let result = handler.handle(input).await;
        self.record(&stage, result.is_ok());

        if let Err(e) = &result {
            tracing::debug!("Stage {} of item {} failed: {}", stage, item_id, e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(stage: &str) -> StageInput {
        StageInput {
            item_id: 7,
            stage: stage.to_string(),
            stage_index: 0,
            attempt: 1,
            payload: json!("payload"),
            carried: None,
        }
    }

    #[tokio::test]
    async fn test_registry_routes_by_stage() {
        let registry = StageRegistry::new()
            .with_fn("a", |input| async move { Ok(json!(format!("a{}", input.item_id))) })
            .with_fn("b", |_| async { Err(RqqError::invocation("nope")) });

        assert_eq!(registry.invoke(input("a")).await.unwrap(), json!("a7"));
        assert!(registry.invoke(input("b")).await.is_err());
        assert_eq!(registry.registered_stages(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_stage_is_terminal() {
        let registry = StageRegistry::new();
        let err = registry.invoke(input("missing")).await.unwrap_err();
        assert!(err.is_terminal());
        assert!(matches!(err, RqqError::StageNotFound { .. }));
    }

    #[tokio::test]
    async fn test_stage_stats() {
        let registry = StageRegistry::new()
            .with_fn("ok", |_| async { Ok(json!(null)) })
            .with_fn("fail", |_| async { Err(RqqError::invocation("flaky")) });

        registry.invoke(input("ok")).await.unwrap();
        registry.invoke(input("ok")).await.unwrap();
        let _ = registry.invoke(input("fail")).await;

        assert_eq!(
            registry.stage_stats("ok"),
            Some(StageStats {
                invocations: 2,
                successes: 2,
                failures: 0
            })
        );
        assert_eq!(registry.stage_stats("fail").unwrap().failures, 1);

        registry.reset_stats();
        assert!(registry.stage_stats("ok").is_none());
    }

    #[tokio::test]
    async fn test_handler_sees_carried_output() {
        let registry = StageRegistry::new().with_fn("second", |input| async move {
            Ok(input.carried.unwrap_or_default())
        });

        let mut second = input("second");
        second.carried = Some(json!(99));
        assert_eq!(registry.invoke(second).await.unwrap(), json!(99));
    }
}
