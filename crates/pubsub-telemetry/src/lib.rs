//! Observability plumbing for the gcpubsub engine.
//!
//! - [`init_logging`] installs a console (text or JSON) subscriber.
//! - [`init_telemetry`] additionally exports spans over OTLP.
//! - [`inject_traceparent`] and [`receive_span`] carry a trace across the
//!   broker inside message attributes.
//! - [`metrics`] wraps Prometheus registration so a duplicate or missing
//!   collector is logged instead of failing the caller.
//!
//! ```rust,ignore
//! let _guard = pubsub_telemetry::init_telemetry(TelemetryConfig::from_env()).await?;
//! ```
//!
//! Settings come from the environment; see [`TelemetryConfig::from_env`].

mod config;
mod context;
mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use context::{inject_traceparent, receive_span, TraceParent, TRACEPARENT_ATTRIBUTE};
pub use logging::init_logging;
pub use metrics::{encode_metrics, register_or_warn, try_register, unregister_or_warn};
pub use tracing_setup::TracingGuard;

#[doc(hidden)]
pub use tracing;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("tracer setup failed: {0}")]
    TracerInit(String),

    #[error("log subscriber setup failed: {0}")]
    LoggingInit(String),

    #[error("metrics encoding failed: {0}")]
    MetricsInit(String),
}

/// Install logging plus OTLP span export for the life of the returned guard.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let tracing = tracing_setup::init_tracing(&config).await?;
    Ok(TelemetryGuard { _tracing: tracing })
}

/// Dropping it flushes buffered spans.
#[must_use = "telemetry stops exporting when the guard is dropped"]
pub struct TelemetryGuard {
    _tracing: TracingGuard,
}
