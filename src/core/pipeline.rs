//! Multi-stage pipeline state machine.
//!
//! An item walks an ordered list of stages. Success moves it forward and
//! resets its per-stage attempt counter; failure keeps it on the same stage
//! and consults the retry policy with the stage-local attempt count.

use crate::config::RetryPolicy;
use crate::core::commit::DropReason;
use crate::core::retry::RetryDecision;
use crate::error::{RqqError, RqqResult};
use crate::item::{StageState, WorkItem};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ordered, non-empty list of stage names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    stages: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from stage names in execution order.
    pub fn new<I, S>(stages: I) -> RqqResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages: Vec<String> = stages.into_iter().map(Into::into).collect();
        if stages.is_empty() {
            return Err(RqqError::config("Pipeline must declare at least one stage"));
        }
        Ok(Self { stages })
    }

    /// A pipeline with exactly one stage.
    pub fn single(stage: impl Into<String>) -> Self {
        Self {
            stages: vec![stage.into()],
        }
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Name of the stage at `index`
    pub fn stage(&self, index: usize) -> Option<&str> {
        self.stages.get(index).map(String::as_str)
    }

    /// All stage names in order
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Whether `index` is the last stage
    pub fn is_final(&self, index: usize) -> bool {
        index + 1 >= self.stages.len()
    }
}

/// What happens to an item after one invocation resolves
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Move to `next_index` carrying the stage output
    Advance {
        /// Stage the item moves to
        next_index: usize,
        /// Output of the stage that just succeeded
        output: serde_json::Value,
    },
    /// The final stage succeeded
    Complete {
        /// Output of the final stage
        output: serde_json::Value,
    },
    /// Requeue at the same stage after `delay`
    Retry {
        /// Backoff delay
        delay: Duration,
    },
    /// Terminate without running later stages
    Drop {
        /// Why the item was dropped
        reason: DropReason,
    },
}

/// Compute the transition for `item` given the result of its current stage.
///
/// The item's attempt counter must already include the attempt that produced
/// `result`.
pub fn next_transition(
    item: &WorkItem,
    result: Result<serde_json::Value, &RqqError>,
    policy: &RetryPolicy,
) -> Transition {
    let (index, attempt) = match item.state {
        StageState::Active { index, attempt } => (index, attempt),
        StageState::Complete => {
            return Transition::Drop {
                reason: DropReason::Abandoned,
            };
        }
    };

    match result {
        Ok(output) if item.pipeline.is_final(index) => Transition::Complete { output },
        Ok(output) => Transition::Advance {
            next_index: index + 1,
            output,
        },
        Err(error) if error.is_terminal() => Transition::Drop {
            reason: DropReason::Terminal {
                message: error.to_string(),
            },
        },
        Err(_) => match policy.decide(attempt) {
            RetryDecision::Retry(delay) => Transition::Retry { delay },
            RetryDecision::Drop => Transition::Drop {
                reason: DropReason::Exhausted {
                    stage: index,
                    attempts: attempt,
                },
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NewItem;
    use serde_json::json;

    fn item_at(stages: &[&str], index: usize, attempt: u32) -> WorkItem {
        let pipeline = Pipeline::new(stages.iter().copied()).unwrap();
        let mut item = WorkItem::from_new(NewItem::new(1, pipeline), 0, Duration::ZERO);
        item.state = StageState::Active { index, attempt };
        item
    }

    #[test]
    fn test_empty_pipeline_is_rejected() {
        let result = Pipeline::new(Vec::<String>::new());
        assert!(matches!(result, Err(RqqError::ConfigError { .. })));
    }

    #[test]
    fn test_success_advances_until_final_stage() {
        let policy = RetryPolicy::default();
        let stages = ["get_data", "do_work", "post_work"];

        let first = item_at(&stages, 0, 1);
        assert_eq!(
            next_transition(&first, Ok(json!(42)), &policy),
            Transition::Advance {
                next_index: 1,
                output: json!(42)
            }
        );

        let last = item_at(&stages, 2, 2);
        assert_eq!(
            next_transition(&last, Ok(json!("done")), &policy),
            Transition::Complete {
                output: json!("done")
            }
        );
    }

    #[test]
    fn test_single_stage_completes_directly() {
        let item = item_at(&["request"], 0, 1);
        let transition = next_transition(&item, Ok(json!(1)), &RetryPolicy::default());
        assert!(matches!(transition, Transition::Complete { .. }));
    }

    #[test]
    fn test_failure_retries_at_same_stage() {
        let policy = RetryPolicy::linear(3, 6_000, 600_000);
        let item = item_at(&["get_data", "do_work"], 1, 1);
        let error = RqqError::invocation("flaky");

        assert_eq!(
            next_transition(&item, Err(&error), &policy),
            Transition::Retry {
                delay: Duration::from_millis(204_000)
            }
        );
    }

    #[test]
    fn test_exhausted_stage_drops() {
        let policy = RetryPolicy::linear(3, 6_000, 600_000);
        let item = item_at(&["get_data", "do_work"], 1, 4);
        let error = RqqError::invocation("flaky");

        assert_eq!(
            next_transition(&item, Err(&error), &policy),
            Transition::Drop {
                reason: DropReason::Exhausted {
                    stage: 1,
                    attempts: 4
                }
            }
        );
    }

    #[test]
    fn test_terminal_failure_bypasses_policy() {
        let policy = RetryPolicy::default();
        let item = item_at(&["request"], 0, 1);
        let error = RqqError::terminal("trapped before commit");

        let transition = next_transition(&item, Err(&error), &policy);
        assert!(matches!(
            transition,
            Transition::Drop {
                reason: DropReason::Terminal { .. }
            }
        ));
    }
}
