//! Configuration types for RQQ.
//!
//! This module contains the configuration structures used by the scheduler:
//! dispatcher limits, the retry/backoff policy and logging settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for RQQ.
///
/// # Examples
///
/// ```rust
/// use rqq::config::{DispatcherConfig, RetryPolicy, RqqConfig};
///
/// // Use default configuration
/// let config = RqqConfig::default();
///
/// // Custom configuration
/// let config = RqqConfig {
///     dispatcher: DispatcherConfig {
///         concurrency_limit: 8,
///         max_queue_size: 10_000,
///         ..Default::default()
///     },
///     retry: RetryPolicy::linear(5, 1_000, 60_000),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RqqConfig {
    /// Dispatcher and admission configuration
    pub dispatcher: DispatcherConfig,

    /// Retry/backoff policy applied independently at every stage
    pub retry: RetryPolicy,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of invocations in flight at once
    pub concurrency_limit: usize,

    /// Maximum number of active items (0 = unlimited)
    pub max_queue_size: usize,

    /// Period of the real-clock driver (in milliseconds)
    pub tick_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 20,
            max_queue_size: 0,      // unlimited
            tick_interval_ms: 1000, // 1 second
        }
    }
}

impl DispatcherConfig {
    /// Create a dispatcher configuration with a specific concurrency limit.
    pub fn with_concurrency(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            ..Default::default()
        }
    }

    /// Set the maximum queue size.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_queue_size = max_size;
        self
    }

    /// Set the driver tick interval.
    pub fn with_tick_interval(mut self, interval_ms: u64) -> Self {
        self.tick_interval_ms = interval_ms;
        self
    }
}

/// Retry policy configuration.
///
/// The delay before retry `n` scales linearly from `min_delay_ms` towards
/// `max_delay_ms` as `n` approaches `max_attempts`, then stays clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed per stage before the item is dropped
    pub max_attempts: u32,

    /// Delay at progress 0 (in milliseconds)
    pub min_delay_ms: u64,

    /// Delay at full progress (in milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_delay_ms: 6_000,   // 6 seconds
            max_delay_ms: 600_000, // 10 minutes
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and delay bounds.
    pub fn linear(max_attempts: u32, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            min_delay_ms,
            max_delay_ms,
        }
    }

    /// Create a policy with a fixed delay between retries.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self::linear(max_attempts, delay_ms, delay_ms)
    }

    /// Drop on the first failure.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Enable colored output
    pub colored: bool,

    /// Include timestamps in logs
    pub include_timestamps: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            colored: true,
            include_timestamps: true,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
    /// Convert milliseconds to Duration
    fn millis(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }

    fn millis(self) -> Duration {
        Duration::from_millis(self)
    }
}

impl RqqConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            dispatcher: DispatcherConfig {
                concurrency_limit: 4,
                max_queue_size: 1000,
                ..Default::default()
            },
            retry: RetryPolicy::linear(5, 1_000, 30_000),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            dispatcher: DispatcherConfig {
                concurrency_limit: 64,
                max_queue_size: 100_000,
                tick_interval_ms: 250,
            },
            retry: RetryPolicy::default(),
            logging: LoggingConfig {
                level: LogLevel::Info,
                colored: false,
                ..Default::default()
            },
        }
    }

    /// Create a configuration for testing.
    ///
    /// Three attempts per stage with the default 6 s / 600 s delay bounds, so
    /// the first retry of a stage waits 204 seconds.
    pub fn testing() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            retry: RetryPolicy::linear(3, 6_000, 600_000),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_timestamps: false,
                include_targets: true,
            },
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.dispatcher.concurrency_limit == 0 {
            errors.push("Concurrency limit must be greater than 0".to_string());
        }

        if self.dispatcher.tick_interval_ms == 0 {
            errors.push("Tick interval must be greater than 0".to_string());
        }

        if self.retry.max_delay_ms < self.retry.min_delay_ms {
            errors.push("Retry max delay must be greater than or equal to min delay".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RqqConfig::default();
        assert_eq!(config.dispatcher.concurrency_limit, 20);
        assert_eq!(config.dispatcher.max_queue_size, 0);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.min_delay_ms, 6_000);
        assert_eq!(config.retry.max_delay_ms, 600_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(RqqConfig::development().validate().is_ok());
        assert!(RqqConfig::production().validate().is_ok());

        let testing = RqqConfig::testing();
        assert_eq!(testing.retry.max_attempts, 3);
        assert!(matches!(testing.logging.level, LogLevel::Debug));
        assert!(testing.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RqqConfig::default();

        config.dispatcher.concurrency_limit = 0;
        assert!(config.validate().is_err());

        config.dispatcher.concurrency_limit = 1;
        config.retry.min_delay_ms = 10;
        config.retry.max_delay_ms = 5;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max delay")));
    }

    #[test]
    fn test_retry_policies() {
        let fixed = RetryPolicy::fixed(2, 1000);
        assert_eq!(fixed.max_attempts, 2);
        assert_eq!(fixed.min_delay_ms, fixed.max_delay_ms);

        let none = RetryPolicy::none();
        assert_eq!(none.max_attempts, 0);
    }

    #[test]
    fn test_dispatcher_config_builders() {
        let config = DispatcherConfig::with_concurrency(8)
            .with_max_size(50)
            .with_tick_interval(100);

        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.max_queue_size, 50);
        assert_eq!(config.tick_interval_ms, 100);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = RqqConfig::testing();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RqqConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.retry, config.retry);
    }

    #[test]
    fn test_duration_ext() {
        assert_eq!(5u64.secs(), Duration::from_secs(5));
        assert_eq!(1500u64.millis(), Duration::from_millis(1500));
    }
}
