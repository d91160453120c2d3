//! Component
//!
//! Owns the broker client and the publisher/dispatcher built on it.
//! Everything it needs is injected through [`ComponentDeps`]; there is no
//! process-global state.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use pubsub_telemetry::log_event;

use super::dispatcher::Dispatcher;
use super::publisher::Publisher;
use crate::domain::{Message, PubSubConfig, PubSubError, ResolvedConfig};
use crate::metrics::{PubSubMetrics, TelemetryRecorder};
use crate::ports::{
    BrokerClient, ClientFactory, Credentials, DialOptions, MessageHandler, PubSubApi,
};

const USER_AGENT: &str = concat!("gcpubsub/", env!("CARGO_PKG_VERSION"));

/// Collaborators injected into [`Component::new`].
#[derive(Clone)]
pub struct ComponentDeps {
    pub factory: Arc<dyn ClientFactory>,
    pub credentials: Option<Credentials>,
    pub dial_options: DialOptions,
    /// Where measurements go. `None` disables metrics regardless of config.
    pub metrics: Option<PubSubMetrics>,
}

impl ComponentDeps {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            credentials: None,
            dial_options: DialOptions::default(),
            metrics: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_dial_options(mut self, options: DialOptions) -> Self {
        self.dial_options = options;
        self
    }

    /// Report into `metrics`. Components sharing a registry share one handle.
    pub fn with_metrics(mut self, metrics: PubSubMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl std::fmt::Debug for ComponentDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDeps")
            .field("credentials", &self.credentials.is_some())
            .field("dial_options", &self.dial_options)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// A connected publish/receive engine.
pub struct Component {
    config: Arc<ResolvedConfig>,
    client: Arc<dyn BrokerClient>,
    publisher: Publisher,
    dispatcher: Dispatcher,
    telemetry: Arc<TelemetryRecorder>,
    shut_down: AtomicBool,
}

impl Component {
    /// Normalize and validate `config`, connect, and build both sides.
    ///
    /// Configuration and connection failures are returned here; nothing is
    /// retried.
    pub async fn new(config: &PubSubConfig, deps: ComponentDeps) -> Result<Self, PubSubError> {
        let config = Arc::new(config.normalize());
        config.validate()?;

        let dial_options = dial_options_for(&config, deps.dial_options);
        let client = deps
            .factory
            .connect(&config.project_id, deps.credentials.as_ref(), &dial_options)
            .await?;

        let telemetry = Arc::new(TelemetryRecorder::new(
            deps.metrics.as_ref(),
            config.metrics_enabled,
        ));
        let publisher = Publisher::new(client.as_ref(), Arc::clone(&config), Arc::clone(&telemetry));
        let dispatcher = Dispatcher::new(client.as_ref(), Arc::clone(&config), Arc::clone(&telemetry));

        log_event!(
            info,
            config.logging_enabled,
            project = %config.project_id,
            topic = %config.topic_id,
            subscription = %config.subscription_id,
            emulator = config.uses_emulator(),
            exactly_once = config.exactly_once_delivery,
            ordering = config.ordering_enabled,
            "Pub/Sub component ready"
        );

        Ok(Self {
            config,
            client,
            publisher,
            dispatcher,
            telemetry,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Flush the publisher, unregister gauges and close the client.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) -> Result<(), PubSubError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.publisher.flush(&CancellationToken::new()).await?;
        self.telemetry.shutdown();
        self.client.close().await?;
        log_event!(
            info,
            self.config.logging_enabled,
            project = %self.config.project_id,
            "Pub/Sub component shut down"
        );
        Ok(())
    }
}

#[async_trait]
impl PubSubApi for Component {
    async fn publish(
        &self,
        token: &CancellationToken,
        message: Message,
    ) -> Result<String, PubSubError> {
        self.publisher.publish(token, message).await
    }

    async fn receive(
        &self,
        token: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PubSubError> {
        self.dispatcher.receive(token, handler).await
    }

    async fn flush_publisher(&self, token: &CancellationToken) -> Result<(), PubSubError> {
        self.publisher.flush(token).await
    }
}

/// Point the client at the emulator (plaintext, unauthenticated) when one is configured.
fn dial_options_for(config: &ResolvedConfig, mut options: DialOptions) -> DialOptions {
    if config.uses_emulator() {
        options.endpoint = Some(config.emulator_endpoint.clone());
        options.insecure = true;
    }
    if options.user_agent.is_none() {
        options.user_agent = Some(USER_AGENT.to_string());
    }
    options
}
