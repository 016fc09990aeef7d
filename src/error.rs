//! Error types for RQQ operations.

use crate::item::ItemId;
use thiserror::Error;

/// Result type used throughout RQQ.
pub type RqqResult<T> = Result<T, RqqError>;

/// Main error type for RQQ operations.
#[derive(Error, Debug)]
pub enum RqqError {
    /// An item with the same id is already active
    #[error("Item {id} is already active")]
    DuplicateId {
        /// The rejected id
        id: ItemId,
    },

    /// The work item store is at capacity
    #[error("Queue is full (max size: {max_size})")]
    QueueFull {
        /// Configured capacity bound
        max_size: usize,
    },

    /// The work function signaled a recoverable failure
    #[error("Invocation failed: {message}")]
    InvocationFailure {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The work function failed before its commit boundary and must not be retried
    #[error("Terminal failure: {message}")]
    TerminalFailure {
        /// Error message
        message: String,
    },

    /// No handler is registered for a pipeline stage
    #[error("No handler registered for stage '{stage}'")]
    StageNotFound {
        /// The stage that has no handler
        stage: String,
    },

    /// Item is not known to the store
    #[error("Item {id} not found")]
    ItemNotFound {
        /// The missing id
        id: ItemId,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// The real-clock driver is already running
    #[error("RQQ driver is already running")]
    AlreadyRunning,

    /// The real-clock driver is not running
    #[error("RQQ driver is not running")]
    NotRunning,

    /// Metrics registration or export error
    #[cfg(feature = "metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl RqqError {
    /// Create a recoverable invocation failure
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::InvocationFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Create a recoverable invocation failure wrapping an underlying error
    pub fn invocation_from<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InvocationFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a terminal failure
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::TerminalFailure {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Whether a work function error bypasses the retry policy.
    ///
    /// A missing stage handler can never succeed on retry, so it is treated
    /// the same as an explicit terminal failure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TerminalFailure { .. } | Self::StageNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(RqqError::terminal("trap").is_terminal());
        assert!(
            RqqError::StageNotFound {
                stage: "missing".to_string()
            }
            .is_terminal()
        );
        assert!(!RqqError::invocation("busy").is_terminal());
        assert!(!RqqError::config("bad").is_terminal());
    }

    #[test]
    fn test_error_messages() {
        let err = RqqError::DuplicateId { id: 7 };
        assert_eq!(err.to_string(), "Item 7 is already active");

        let err = RqqError::QueueFull { max_size: 2 };
        assert_eq!(err.to_string(), "Queue is full (max size: 2)");
    }

    #[test]
    fn test_invocation_keeps_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out");
        let err = RqqError::invocation_from("fetch failed", io);

        assert!(!err.is_terminal());
        let source = err.source().expect("source should be kept");
        assert_eq!(source.to_string(), "upstream timed out");

        assert!(RqqError::invocation("busy").source().is_none());
    }
}
