//! Error types for the publish/receive engine.

use thiserror::Error;

/// Exact text of [`PubSubError::PublisherDisabled`]. Callers match on it.
pub const PUBLISHER_DISABLED_MESSAGE: &str = "gcpubsub: publisher disabled";

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Missing or contradictory identity fields. Fatal at construction.
    #[error("gcpubsub: invalid configuration: {0}")]
    Configuration(String),

    /// Publish attempted with no topic configured.
    #[error("gcpubsub: publisher disabled")]
    PublisherDisabled,

    /// Receive attempted with no subscription configured.
    #[error("gcpubsub: subscriber disabled")]
    SubscriberDisabled,

    /// The caller's cancellation token fired.
    #[error("gcpubsub: context canceled")]
    Cancelled,

    /// The publish timeout elapsed before the broker acknowledged.
    #[error("gcpubsub: deadline exceeded")]
    DeadlineExceeded,

    /// Transport or broker-side failure.
    #[error("gcpubsub: {0}")]
    Broker(#[from] BrokerError),
}

impl PubSubError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PubSubError::Broker(BrokerError::Unavailable(_)))
    }

    /// True for [`PubSubError::Cancelled`] and [`PubSubError::DeadlineExceeded`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PubSubError::Cancelled | PubSubError::DeadlineExceeded)
    }
}

/// Errors reported by a broker client implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("topic stopped: {0}")]
    TopicStopped(String),

    #[error("unknown ack id: {0}")]
    UnknownAckId(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("failed to connect: {0}")]
    Connection(String),

    #[error("client closed")]
    Closed,
}

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a handler invocation did not succeed.
///
/// Both variants lead to the same outcome: the message is not acknowledged
/// and the broker redelivers it.
#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error("handler returned error: {0}")]
    Returned(HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl DispatchFailure {
    /// Build a [`DispatchFailure::Panicked`] from a caught unwind payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        DispatchFailure::Panicked(message)
    }
}
