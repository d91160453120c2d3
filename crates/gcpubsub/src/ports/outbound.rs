//! Outbound Ports (Driven Ports)
//!
//! The broker client the engine drives. Implementations own the network
//! transport, authentication, server-side storage and redelivery timing;
//! the engine only orchestrates calls into them.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{BrokerError, Message};

/// Opaque credentials handed to the client factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Service-account key or token material, as the client understands it.
    pub json: String,
}

/// Transport options handed to the client factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialOptions {
    /// Endpoint override; the emulator address when one is configured.
    pub endpoint: Option<String>,
    /// Skip TLS and authentication (emulators).
    pub insecure: bool,
    pub user_agent: Option<String>,
}

/// A message pulled from a subscription, with the handle used to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: Message,
}

/// Settings used when creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    pub topic_id: String,
    pub ack_deadline: Duration,
    pub enable_message_ordering: bool,
    pub enable_exactly_once_delivery: bool,
}

impl SubscriptionSettings {
    pub fn new(topic_id: impl Into<String>) -> Self {
        Self {
            topic_id: topic_id.into(),
            ack_deadline: Duration::from_secs(10),
            enable_message_ordering: false,
            enable_exactly_once_delivery: false,
        }
    }
}

/// Publishing side of a topic.
#[async_trait]
pub trait TopicHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Submit one message. Returns the broker-assigned message id.
    async fn publish(&self, message: Message) -> Result<String, BrokerError>;

    /// Drain buffered publishes and stop the handle. Idempotent.
    async fn flush(&self);
}

/// Consuming side of a subscription.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Wait for at least one message and return up to `max_messages`.
    async fn pull(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, BrokerError>;

    /// Settle a message as processed; it will not be redelivered.
    async fn ack(&self, ack_id: &str) -> Result<(), BrokerError>;

    /// Release a message for prompt redelivery.
    async fn nack(&self, ack_id: &str) -> Result<(), BrokerError>;

    /// Push the ack deadline of an outstanding message `extension` into the future.
    async fn modify_ack_deadline(&self, ack_id: &str, extension: Duration) -> Result<(), BrokerError>;
}

/// Resource management. Used by setup code and tests, never by the runtime path.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    async fn create_topic(&self, topic_id: &str) -> Result<(), BrokerError>;

    async fn topic_exists(&self, topic_id: &str) -> Result<bool, BrokerError>;

    async fn create_subscription(
        &self,
        subscription_id: &str,
        settings: SubscriptionSettings,
    ) -> Result<(), BrokerError>;

    async fn subscription_exists(&self, subscription_id: &str) -> Result<bool, BrokerError>;
}

/// Connected broker client. Shared read-only by publisher and dispatcher.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn topic(&self, topic_id: &str) -> Arc<dyn TopicHandle>;

    fn subscription(&self, subscription_id: &str) -> Arc<dyn SubscriptionHandle>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Builds broker clients. Injected into the component so tests can swap in
/// an emulator or a mock.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        project_id: &str,
        credentials: Option<&Credentials>,
        options: &DialOptions,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError>;
}
