//! Shared test fixtures.

use async_trait::async_trait;
use gcpubsub::{
    ensure_resources, Component, ComponentDeps, HandlerError, InMemoryBroker,
    InMemoryClientFactory, Message, MessageHandler, PubSubApi, PubSubConfig, PubSubError,
    PubSubMetrics,
};
use parking_lot::Mutex;
use prometheus::Registry;
use pubsub_telemetry::{init_logging, TelemetryConfig};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

pub const PROJECT: &str = "test-project";
pub const TOPIC: &str = "orders";
pub const SUBSCRIPTION: &str = "orders-worker";

pub fn base_config() -> PubSubConfig {
    PubSubConfig::new(PROJECT)
        .with_topic(TOPIC)
        .with_subscription(SUBSCRIPTION)
}

static LOGGING: Once = Once::new();

/// Install a console subscriber once per test binary. Only errors are shown.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let config = TelemetryConfig {
            log_level: "error".to_string(),
            ..TelemetryConfig::for_service("gcpubsub-tests")
        };
        // Another harness may already own the global subscriber.
        let _ = init_logging(&config);
    });
}

/// One broker, one factory and one metrics registry per test.
///
/// Every component built from the bed reports through the same
/// [`PubSubMetrics`] handle.
pub struct TestBed {
    pub factory: InMemoryClientFactory,
    pub registry: Registry,
    pub metrics: PubSubMetrics,
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBed {
    pub fn new() -> Self {
        init_test_logging();
        let registry = Registry::new();
        Self {
            factory: InMemoryClientFactory::new(InMemoryBroker::new()),
            metrics: PubSubMetrics::register(&registry),
            registry,
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        self.factory.broker()
    }

    pub fn deps(&self) -> ComponentDeps {
        ComponentDeps::new(Arc::new(self.factory.clone()))
            .with_metrics(self.metrics.clone())
    }

    /// Create the config's topic/subscription, then build a component.
    pub async fn component(&self, config: &PubSubConfig) -> Arc<Component> {
        ensure_resources(self.broker(), &config.normalize())
            .await
            .expect("provision");
        Arc::new(
            Component::new(config, self.deps())
                .await
                .expect("component"),
        )
    }
}

/// A background `receive` call.
pub struct ReceiveTask {
    token: CancellationToken,
    handle: JoinHandle<Result<(), PubSubError>>,
}

impl ReceiveTask {
    pub fn spawn(component: &Arc<Component>, handler: Arc<dyn MessageHandler>) -> Self {
        let token = CancellationToken::new();
        let component = Arc::clone(component);
        let receive_token = token.clone();
        let handle = tokio::spawn(async move { component.receive(receive_token, handler).await });
        Self { token, handle }
    }

    /// Cancel and wait for `receive` to return.
    pub async fn stop(self) -> Result<(), PubSubError> {
        self.token.cancel();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("receive did not stop")
            .expect("receive task panicked")
    }
}

pub async fn publish(component: &Component, message: Message) -> String {
    component
        .publish(&CancellationToken::new(), message)
        .await
        .expect("publish")
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

/// What a [`ScriptedHandler`] does with the nth delivery of a message.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Ack,
    /// Return an error for the first `n` deliveries of each message.
    FailFirst(usize),
    /// Panic during the first `n` deliveries of each message.
    PanicFirst(usize),
}

/// Handler that records every delivery and follows a [`Script`].
pub struct ScriptedHandler {
    script: Script,
    delay: Duration,
    deliveries: Mutex<Vec<Message>>,
}

impl ScriptedHandler {
    pub fn new(script: Script) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            delay,
            deliveries: Mutex::new(Vec::new()),
        })
    }

    pub fn deliveries(&self) -> Vec<Message> {
        self.deliveries.lock().clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Delivery attempts observed for one message id, in order.
    pub fn attempts_of(&self, message_id: &str) -> Vec<u32> {
        self.deliveries
            .lock()
            .iter()
            .filter(|m| m.id == message_id)
            .map(|m| m.delivery_attempt)
            .collect()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        let nth = {
            let mut deliveries = self.deliveries.lock();
            deliveries.push(message.clone());
            deliveries.iter().filter(|m| m.id == message.id).count()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.script {
            Script::FailFirst(n) if nth <= n => {
                Err(format!("scripted failure {nth} for {}", message.id).into())
            }
            Script::PanicFirst(n) if nth <= n => panic!("scripted panic {nth} for {}", message.id),
            _ => Ok(()),
        }
    }
}

/// Sum of a counter family's samples whose `label` equals `value`.
pub fn counter_value(registry: &Registry, name: &str, label: &str, value: &str) -> u64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric().iter())
        .filter(|metric| {
            metric
                .get_label()
                .iter()
                .any(|pair| pair.get_name() == label && pair.get_value() == value)
        })
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

/// Total number of observations in a histogram family.
pub fn histogram_count(registry: &Registry, name: &str) -> u64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| metric.get_histogram().get_sample_count())
        .sum()
}
