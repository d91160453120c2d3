//! Prometheus registry helpers.
//!
//! Instruments are registered into a caller-owned [`Registry`] rather than a
//! process-global one, so two engines (or two tests) never collide on names.
//! Registration failures degrade the single instrument to `None` and are
//! logged, never returned.

use prometheus::core::Collector;
use prometheus::{exponential_buckets, Encoder, Registry, TextEncoder};

use crate::TelemetryError;

/// Millisecond buckets: 0.5 ms .. ~65 s.
pub fn latency_buckets_ms() -> Vec<f64> {
    exponential_buckets(0.5, 2.0, 18).unwrap_or_default()
}

/// Byte buckets: 64 B .. 16 MiB.
pub fn size_buckets_bytes() -> Vec<f64> {
    exponential_buckets(64.0, 4.0, 10).unwrap_or_default()
}

/// Register `collector`, returning it on success.
///
/// On failure the error is logged at warn level and `None` is returned so the
/// caller can treat that measurement as a no-op.
pub fn register_or_warn<C>(registry: &Registry, name: &str, collector: C) -> Option<C>
where
    C: Collector + Clone + 'static,
{
    match registry.register(Box::new(collector.clone())) {
        Ok(()) => Some(collector),
        Err(e) => {
            tracing::warn!(metric = name, error = %e, "Failed to register metric instrument");
            None
        }
    }
}

/// Build and register an instrument in one step.
///
/// `build` failures (invalid name, bad buckets) are handled the same way as
/// registration failures.
pub fn try_register<C, F>(registry: &Registry, name: &str, build: F) -> Option<C>
where
    C: Collector + Clone + 'static,
    F: FnOnce() -> prometheus::Result<C>,
{
    match build() {
        Ok(collector) => register_or_warn(registry, name, collector),
        Err(e) => {
            tracing::warn!(metric = name, error = %e, "Failed to create metric instrument");
            None
        }
    }
}

/// Remove a previously registered collector. Failures are logged.
pub fn unregister_or_warn<C>(registry: &Registry, name: &str, collector: &C)
where
    C: Collector + Clone + 'static,
{
    if let Err(e) = registry.unregister(Box::new(collector.clone())) {
        tracing::warn!(metric = name, error = %e, "Failed to unregister metric instrument");
    }
}

/// Encode all metrics of `registry` in Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
