//! Inbound Ports (Driving Ports)
//!
//! The API the surrounding application calls, and the handler contract it
//! implements for received messages.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::{HandlerError, Message, PubSubError};

/// Business logic invoked once per delivered message.
///
/// `Ok(())` acknowledges the message. Any error (or a panic) leaves it
/// unacknowledged and the broker redelivers it with `delivery_attempt`
/// incremented.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self)(message).await
    }
}

/// Publish/receive API exposed to the application.
#[async_trait]
pub trait PubSubApi: Send + Sync {
    /// Publish one message, returning the broker-assigned id.
    async fn publish(
        &self,
        token: &CancellationToken,
        message: Message,
    ) -> Result<String, PubSubError>;

    /// Dispatch messages to `handler` until `token` is cancelled or pulling fails.
    async fn receive(
        &self,
        token: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PubSubError>;

    /// Drain buffered publishes and stop the topic handle, bounded by `token`.
    async fn flush_publisher(&self, token: &CancellationToken) -> Result<(), PubSubError>;
}
