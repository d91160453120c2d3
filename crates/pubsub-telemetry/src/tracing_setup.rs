//! OTLP span export.
//!
//! Spans are batched to the collector on the Tokio runtime. The console
//! formatter from [`crate::init_logging`] rides on the same registry unless
//! `console_output` is off.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self, RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::logging::env_filter;
use crate::{TelemetryConfig, TelemetryError};

/// Owns the tracer provider; dropping it flushes and stops the exporter.
pub struct TracingGuard {
    provider: TracerProvider,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        // The subscriber may already be gone, so report on stderr.
        if let Err(e) = self.provider.shutdown() {
            eprintln!("span exporter shutdown failed: {e:?}");
        }
    }
}

pub async fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let provider = tracer_provider(config)?;
    let otel = tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()));

    tracing_subscriber::registry()
        .with(env_filter(config)?)
        .with(otel)
        .with(console_layer(config))
        .try_init()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        "Span export enabled"
    );
    Ok(TracingGuard { provider })
}

fn tracer_provider(config: &TelemetryConfig) -> Result<TracerProvider, TelemetryError> {
    let resource = Resource::new([
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&config.otlp_endpoint),
        )
        .with_trace_config(
            trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))
}

fn console_layer<S>(config: &TelemetryConfig) -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if !config.console_output {
        return None;
    }
    let fmt = tracing_subscriber::fmt::layer().with_target(true);
    Some(if config.json_logs {
        fmt.json()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt.with_ansi(true).boxed()
    })
}
