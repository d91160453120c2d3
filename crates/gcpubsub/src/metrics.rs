//! Publish and receive telemetry.
//!
//! [`TelemetryRecorder`] records each publish and each completed handler
//! invocation into a caller-supplied Prometheus registry, through a
//! [`PubSubMetrics`] handle shared by every component reporting there. A
//! recorder built without one, or with metrics switched off, is a no-op.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `pubsub_publish_total` | counter | `topic`, `pubsub_result` |
//! | `pubsub_publish_latency_ms` | histogram | `topic` |
//! | `pubsub_publish_payload_bytes` | histogram | `topic` |
//! | `pubsub_receive_total` | counter | `subscription`, `pubsub_result` |
//! | `pubsub_delivery_attempt_total` | counter | `subscription`, `pubsub_delivery_attempt` |
//! | `pubsub_handler_duration_ms` | histogram | `subscription` |
//! | `pubsub_ack_latency_ms` | histogram | `subscription` |
//! | `pubsub_outstanding_messages` | gauge | `subscription` |
//!
//! Label keys are the Prometheus rendering of the `pubsub.result` and
//! `pubsub.delivery_attempt` attributes.

use parking_lot::Mutex;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use pubsub_telemetry::metrics::{latency_buckets_ms, size_buckets_bytes};
use pubsub_telemetry::{try_register, unregister_or_warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PUBLISH_TOTAL: &str = "pubsub_publish_total";
pub const PUBLISH_LATENCY_MS: &str = "pubsub_publish_latency_ms";
pub const PUBLISH_PAYLOAD_BYTES: &str = "pubsub_publish_payload_bytes";
pub const RECEIVE_TOTAL: &str = "pubsub_receive_total";
pub const DELIVERY_ATTEMPT_TOTAL: &str = "pubsub_delivery_attempt_total";
pub const HANDLER_DURATION_MS: &str = "pubsub_handler_duration_ms";
pub const ACK_LATENCY_MS: &str = "pubsub_ack_latency_ms";
pub const OUTSTANDING_MESSAGES: &str = "pubsub_outstanding_messages";

pub const RESULT_LABEL: &str = "pubsub_result";
pub const DELIVERY_ATTEMPT_LABEL: &str = "pubsub_delivery_attempt";

/// Result of a recorded operation. Exactly one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Error
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

struct Instruments {
    publish_total: Option<IntCounterVec>,
    publish_latency: Option<HistogramVec>,
    publish_payload: Option<HistogramVec>,
    receive_total: Option<IntCounterVec>,
    delivery_attempt_total: Option<IntCounterVec>,
    handler_duration: Option<HistogramVec>,
    ack_latency: Option<HistogramVec>,
}

impl Instruments {
    fn register(registry: &Registry) -> Self {
        Self {
            publish_total: try_register(registry, PUBLISH_TOTAL, || {
                IntCounterVec::new(
                    Opts::new(PUBLISH_TOTAL, "Publish attempts by outcome"),
                    &["topic", RESULT_LABEL],
                )
            }),
            publish_latency: try_register(registry, PUBLISH_LATENCY_MS, || {
                HistogramVec::new(
                    HistogramOpts::new(PUBLISH_LATENCY_MS, "Publish latency in milliseconds")
                        .buckets(latency_buckets_ms()),
                    &["topic"],
                )
            }),
            publish_payload: try_register(registry, PUBLISH_PAYLOAD_BYTES, || {
                HistogramVec::new(
                    HistogramOpts::new(PUBLISH_PAYLOAD_BYTES, "Published payload size in bytes")
                        .buckets(size_buckets_bytes()),
                    &["topic"],
                )
            }),
            receive_total: try_register(registry, RECEIVE_TOTAL, || {
                IntCounterVec::new(
                    Opts::new(RECEIVE_TOTAL, "Handled deliveries by outcome"),
                    &["subscription", RESULT_LABEL],
                )
            }),
            delivery_attempt_total: try_register(registry, DELIVERY_ATTEMPT_TOTAL, || {
                IntCounterVec::new(
                    Opts::new(DELIVERY_ATTEMPT_TOTAL, "Deliveries by delivery attempt number"),
                    &["subscription", DELIVERY_ATTEMPT_LABEL],
                )
            }),
            handler_duration: try_register(registry, HANDLER_DURATION_MS, || {
                HistogramVec::new(
                    HistogramOpts::new(HANDLER_DURATION_MS, "Handler duration in milliseconds")
                        .buckets(latency_buckets_ms()),
                    &["subscription"],
                )
            }),
            ack_latency: try_register(registry, ACK_LATENCY_MS, || {
                HistogramVec::new(
                    HistogramOpts::new(
                        ACK_LATENCY_MS,
                        "Pull to ack/nack latency in milliseconds",
                    )
                    .buckets(latency_buckets_ms()),
                    &["subscription"],
                )
            }),
        }
    }
}

/// The outstanding gauge lives while at least one recorder is attached.
#[derive(Default)]
struct OutstandingGauge {
    gauge: Option<IntGaugeVec>,
    attached: usize,
}

struct SharedMetrics {
    registry: Registry,
    instruments: Instruments,
    outstanding: Mutex<OutstandingGauge>,
}

/// Instrument set for one Prometheus registry.
///
/// Register once per registry and clone the handle into every
/// [`ComponentDeps`](crate::ComponentDeps) that should report there. Series
/// from different components stay apart through their `topic` and
/// `subscription` labels. Registering a second set into the same registry
/// collides on every name; those instruments are logged and left out.
#[derive(Clone)]
pub struct PubSubMetrics {
    shared: Arc<SharedMetrics>,
}

impl PubSubMetrics {
    pub fn register(registry: &Registry) -> Self {
        Self {
            shared: Arc::new(SharedMetrics {
                registry: registry.clone(),
                instruments: Instruments::register(registry),
                outstanding: Mutex::new(OutstandingGauge::default()),
            }),
        }
    }

    fn attach(&self) {
        let mut outstanding = self.shared.outstanding.lock();
        outstanding.attached += 1;
        if outstanding.gauge.is_none() {
            outstanding.gauge = try_register(&self.shared.registry, OUTSTANDING_MESSAGES, || {
                IntGaugeVec::new(
                    Opts::new(OUTSTANDING_MESSAGES, "Messages pulled and not yet settled"),
                    &["subscription"],
                )
            });
        }
    }

    /// Drop the detaching recorder's series; the last one out unregisters the gauge.
    fn detach(&self, subscriptions: impl IntoIterator<Item = String>) {
        let mut outstanding = self.shared.outstanding.lock();
        outstanding.attached = outstanding.attached.saturating_sub(1);
        if let Some(gauge) = &outstanding.gauge {
            for subscription in subscriptions {
                // Absent when the series was never set.
                let _ = gauge.remove_label_values(&[subscription.as_str()]);
            }
        }
        if outstanding.attached == 0 {
            if let Some(gauge) = outstanding.gauge.take() {
                unregister_or_warn(&self.shared.registry, OUTSTANDING_MESSAGES, &gauge);
            }
        }
    }
}

impl std::fmt::Debug for PubSubMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubMetrics")
            .field("attached", &self.shared.outstanding.lock().attached)
            .finish_non_exhaustive()
    }
}

/// Records publish/receive measurements. Shared by publisher and dispatcher.
pub struct TelemetryRecorder {
    metrics: Option<PubSubMetrics>,
    /// Cleared by `shutdown`; later gauge updates are dropped.
    attached: AtomicBool,
    subscriptions: Mutex<HashSet<String>>,
}

impl TelemetryRecorder {
    /// Build a recorder reporting to `metrics`.
    ///
    /// No metrics handle, or `enabled == false`, yields the no-op recorder.
    pub fn new(metrics: Option<&PubSubMetrics>, enabled: bool) -> Self {
        let Some(metrics) = metrics.filter(|_| enabled) else {
            return Self::disabled();
        };
        metrics.attach();
        Self {
            metrics: Some(metrics.clone()),
            attached: AtomicBool::new(true),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            metrics: None,
            attached: AtomicBool::new(false),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.metrics.is_some()
    }

    fn instruments(&self) -> Option<&Instruments> {
        self.metrics.as_ref().map(|m| &m.shared.instruments)
    }

    /// Record one publish call.
    pub fn record_publish(&self, topic: &str, payload_bytes: usize, elapsed: Duration, outcome: Outcome) {
        let Some(instruments) = self.instruments() else {
            return;
        };

        if let Some(counter) = &instruments.publish_total {
            counter.with_label_values(&[topic, outcome.as_str()]).inc();
        }
        if let Some(histogram) = &instruments.publish_latency {
            histogram.with_label_values(&[topic]).observe(as_millis(elapsed));
        }
        if let Some(histogram) = &instruments.publish_payload {
            histogram.with_label_values(&[topic]).observe(payload_bytes as f64);
        }
    }

    /// Record one completed handler invocation.
    pub fn record_receive(
        &self,
        subscription: &str,
        total_elapsed: Duration,
        handler_elapsed: Duration,
        delivery_attempt: u32,
        outcome: Outcome,
    ) {
        let Some(instruments) = self.instruments() else {
            return;
        };

        if let Some(counter) = &instruments.receive_total {
            counter.with_label_values(&[subscription, outcome.as_str()]).inc();
        }
        if let Some(counter) = &instruments.delivery_attempt_total {
            let attempt = delivery_attempt.to_string();
            counter.with_label_values(&[subscription, attempt.as_str()]).inc();
        }
        if let Some(histogram) = &instruments.handler_duration {
            histogram.with_label_values(&[subscription]).observe(as_millis(handler_elapsed));
        }
        if let Some(histogram) = &instruments.ack_latency {
            histogram.with_label_values(&[subscription]).observe(as_millis(total_elapsed));
        }
    }

    /// Update the outstanding-messages gauge for a subscription.
    pub fn set_outstanding(&self, subscription: &str, outstanding: usize) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let mut subscriptions = self.subscriptions.lock();
        if !self.attached.load(Ordering::Acquire) {
            return;
        }
        if let Some(gauge) = &metrics.shared.outstanding.lock().gauge {
            gauge
                .with_label_values(&[subscription])
                .set(i64::try_from(outstanding).unwrap_or(i64::MAX));
            if !subscriptions.contains(subscription) {
                subscriptions.insert(subscription.to_string());
            }
        }
    }

    /// Detach from the shared gauge. Idempotent; failures are logged.
    pub fn shutdown(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let mut subscriptions = self.subscriptions.lock();
        if self.attached.swap(false, Ordering::AcqRel) {
            metrics.detach(subscriptions.drain());
        }
    }
}

impl std::fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

fn as_millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
