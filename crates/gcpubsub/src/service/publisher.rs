//! Publisher
//!
//! Sends one message per call to the configured topic, bounded by the
//! publish timeout and the caller's cancellation token. Every call that gets
//! past the disabled check records exactly one publish measurement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pubsub_telemetry::{inject_traceparent, log_event};

use crate::domain::{Message, PubSubError, ResolvedConfig};
use crate::metrics::{Outcome, TelemetryRecorder};
use crate::ports::{BrokerClient, TopicHandle};

pub struct Publisher {
    /// `None` when no topic is configured.
    topic: Option<Arc<dyn TopicHandle>>,
    config: Arc<ResolvedConfig>,
    telemetry: Arc<TelemetryRecorder>,
    flushed: AtomicBool,
}

impl Publisher {
    pub fn new(
        client: &dyn BrokerClient,
        config: Arc<ResolvedConfig>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        let topic = config
            .publisher_enabled()
            .then(|| client.topic(&config.topic_id));
        Self {
            topic,
            config,
            telemetry,
            flushed: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.topic.is_some()
    }

    /// Publish `message`, returning the broker-assigned id.
    ///
    /// An already-cancelled token fails without contacting the broker.
    pub async fn publish(
        &self,
        token: &CancellationToken,
        mut message: Message,
    ) -> Result<String, PubSubError> {
        let Some(topic) = &self.topic else {
            return Err(PubSubError::PublisherDisabled);
        };

        if !self.config.ordering_enabled {
            message.clear_ordering_key();
        }
        inject_traceparent(&mut message.attributes);

        let payload_bytes = message.payload_len();
        let started = Instant::now();
        let result = if token.is_cancelled() {
            Err(PubSubError::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(PubSubError::Cancelled),
                sent = tokio::time::timeout(self.config.publish_timeout, topic.publish(message)) => {
                    match sent {
                        Ok(Ok(id)) => Ok(id),
                        Ok(Err(e)) => Err(PubSubError::Broker(e)),
                        Err(_) => Err(PubSubError::DeadlineExceeded),
                    }
                }
            }
        };

        self.telemetry.record_publish(
            topic.id(),
            payload_bytes,
            started.elapsed(),
            Outcome::of(&result),
        );

        match &result {
            Ok(id) => log_event!(
                debug,
                self.config.logging_enabled,
                topic = topic.id(),
                message_id = %id,
                bytes = payload_bytes,
                "Message published"
            ),
            Err(e) => log_event!(
                warn,
                self.config.logging_enabled,
                topic = topic.id(),
                error = %e,
                "Publish failed"
            ),
        }

        result
    }

    /// Drain buffered publishes and stop the topic.
    ///
    /// Once a drain has completed later calls return immediately. A drain cut
    /// short by `token` reports [`PubSubError::Cancelled`] and can be retried.
    pub async fn flush(&self, token: &CancellationToken) -> Result<(), PubSubError> {
        let Some(topic) = &self.topic else {
            return Ok(());
        };
        if self.flushed.load(Ordering::Acquire) {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PubSubError::Cancelled),
            _ = topic.flush() => {}
        }
        self.flushed.store(true, Ordering::Release);
        log_event!(debug, self.config.logging_enabled, topic = topic.id(), "Publisher flushed");
        Ok(())
    }
}
