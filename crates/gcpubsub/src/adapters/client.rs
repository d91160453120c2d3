//! Broker client backed by [`InMemoryBroker`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::emulator::InMemoryBroker;
use crate::domain::{BrokerError, Message};
use crate::ports::{
    BrokerClient, ClientFactory, Credentials, DialOptions, ReceivedMessage, SubscriptionHandle,
    TopicHandle,
};

/// One connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryClient {
    broker: InMemoryBroker,
    project_id: String,
    closed: Arc<AtomicBool>,
}

impl InMemoryClient {
    pub fn new(broker: InMemoryBroker, project_id: impl Into<String>) -> Self {
        Self {
            broker,
            project_id: project_id.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    fn topic(&self, topic_id: &str) -> Arc<dyn TopicHandle> {
        Arc::new(InMemoryTopic {
            broker: self.broker.clone(),
            id: topic_id.to_string(),
            client_closed: self.closed.clone(),
            stopped: AtomicBool::new(false),
        })
    }

    fn subscription(&self, subscription_id: &str) -> Arc<dyn SubscriptionHandle> {
        Arc::new(InMemorySubscription {
            broker: self.broker.clone(),
            id: subscription_id.to_string(),
            client_closed: self.closed.clone(),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(project = %self.project_id, "In-memory client closed");
        }
        Ok(())
    }
}

/// Topic handle. Stops accepting publishes after [`TopicHandle::flush`].
#[derive(Debug)]
pub struct InMemoryTopic {
    broker: InMemoryBroker,
    id: String,
    client_closed: Arc<AtomicBool>,
    stopped: AtomicBool,
}

#[async_trait]
impl TopicHandle for InMemoryTopic {
    fn id(&self) -> &str {
        &self.id
    }

    async fn publish(&self, message: Message) -> Result<String, BrokerError> {
        if self.client_closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(BrokerError::TopicStopped(self.id.clone()));
        }
        self.broker.publish(&self.id, message).await
    }

    async fn flush(&self) {
        // Publishes are stored synchronously, so there is nothing buffered to drain.
        self.stopped.store(true, Ordering::Release);
    }
}

/// Subscription handle.
#[derive(Debug)]
pub struct InMemorySubscription {
    broker: InMemoryBroker,
    id: String,
    client_closed: Arc<AtomicBool>,
}

impl InMemorySubscription {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.client_closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionHandle for InMemorySubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn pull(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, BrokerError> {
        self.ensure_open()?;
        self.broker.pull(&self.id, max_messages).await
    }

    async fn ack(&self, ack_id: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.ack(&self.id, ack_id)
    }

    async fn nack(&self, ack_id: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.nack(&self.id, ack_id)
    }

    async fn modify_ack_deadline(&self, ack_id: &str, extension: Duration) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.modify_ack_deadline(&self.id, ack_id, extension)
    }
}

/// Client factory connecting to a shared [`InMemoryBroker`].
///
/// Records the dial options of every connection so tests can assert on them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClientFactory {
    broker: InMemoryBroker,
    dials: Arc<Mutex<Vec<DialOptions>>>,
    refuse: Arc<AtomicBool>,
}

impl InMemoryClientFactory {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            ..Self::default()
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Dial options passed to each `connect` call, in order.
    pub fn dials(&self) -> Vec<DialOptions> {
        self.dials.lock().clone()
    }

    /// Make subsequent `connect` calls fail as if the broker were unreachable.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }
}

#[async_trait]
impl ClientFactory for InMemoryClientFactory {
    async fn connect(
        &self,
        project_id: &str,
        _credentials: Option<&Credentials>,
        options: &DialOptions,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        self.dials.lock().push(options.clone());
        if self.refuse.load(Ordering::Acquire) {
            return Err(BrokerError::Connection(format!(
                "in-memory broker refused connection for project {project_id:?}"
            )));
        }
        Ok(Arc::new(InMemoryClient::new(self.broker.clone(), project_id)))
    }
}
