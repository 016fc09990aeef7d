//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::{RqqError, RqqResult};

/// Install a global `tracing` subscriber according to `config`.
///
/// Fails if a global subscriber is already installed.
///
/// ```rust,no_run
/// use rqq::config::RqqConfig;
///
/// rqq::logging::init_logging(&RqqConfig::development().logging)?;
/// # Ok::<(), rqq::RqqError>(())
/// ```
pub fn init_logging(config: &LoggingConfig) -> RqqResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.level))
        .with_target(config.include_targets)
        .with_ansi(config.colored);

    let installed = if config.include_timestamps {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };

    installed.map_err(|e| RqqError::config(format!("Failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RqqConfig;

    #[test]
    fn test_second_init_fails() {
        let config = RqqConfig::testing().logging;
        let _ = init_logging(&config);

        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, RqqError::ConfigError { .. }));
    }
}
