//! Telemetry settings, read from the process environment.

use std::env;

const DEFAULT_SERVICE: &str = "gcpubsub";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Where logs and spans go, and in what shape.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute and tracer name.
    pub service_name: String,
    pub otlp_endpoint: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Mirror events to stdout next to the OTLP exporter.
    pub console_output: bool,
    pub json_logs: bool,
    /// `deployment.environment` resource attribute.
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE.into(),
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.into(),
            log_level: "info".into(),
            console_output: true,
            json_logs: false,
            environment: "dev".into(),
        }
    }
}

impl TelemetryConfig {
    /// Build from `OTEL_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`,
    /// `PUBSUB_LOG_LEVEL` (or `RUST_LOG`), `PUBSUB_CONSOLE_OUTPUT`,
    /// `PUBSUB_JSON_LOGS` and `PUBSUB_ENVIRONMENT`.
    ///
    /// JSON logs default on when running under Kubernetes or Docker.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let containerised = present("KUBERNETES_SERVICE_HOST") || present("DOCKER_CONTAINER");

        Self {
            service_name: text("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            otlp_endpoint: text("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            log_level: text("PUBSUB_LOG_LEVEL")
                .or_else(|| text("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            console_output: flag("PUBSUB_CONSOLE_OUTPUT", defaults.console_output),
            json_logs: flag("PUBSUB_JSON_LOGS", containerised),
            environment: text("PUBSUB_ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// [`from_env`](Self::from_env) with the service name pinned.
    pub fn for_service(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_owned(),
            ..Self::from_env()
        }
    }
}

fn present(key: &str) -> bool {
    env::var_os(key).is_some()
}

fn text(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn flag(key: &str, default: bool) -> bool {
    text(key).map_or(default, |v| parse_flag(&v, default))
}

/// Unrecognised values keep `default`.
fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
