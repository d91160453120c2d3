//! Structured logging setup.
//!
//! Logs carry consistent fields so a log shipper can index them:
//! - `timestamp`, `level`, `target`
//! - `topic` / `subscription`: the broker resource involved
//! - `message_id`, `delivery_attempt`: per-message context
//! - `error`: display form of the failure, when there is one

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Build the env filter from `RUST_LOG`, falling back to the configured level.
pub(crate) fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Install a console-only subscriber (no trace export).
///
/// Intended for tools and test binaries that want readable output without an
/// OTLP collector. Fails if a global subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::debug!(
        json_logs = config.json_logs,
        log_level = %config.log_level,
        "Structured logging configured"
    );

    Ok(())
}

/// Emit a log event only when `$enabled` is true.
///
/// The engine carries an administrative logging switch; this keeps the
/// check to a single branch at each call site.
///
/// ```rust,ignore
/// log_event!(warn, self.logging, topic = %topic, error = %e, "publish failed");
/// ```
#[macro_export]
macro_rules! log_event {
    ($level:ident, $enabled:expr, $($arg:tt)+) => {
        if $enabled {
            $crate::tracing::$level!($($arg)+);
        }
    };
}
