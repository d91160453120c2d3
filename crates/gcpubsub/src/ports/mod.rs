//! Ports Layer
//!
//! Defines the interfaces (traits) for:
//! - Driving Ports (inbound) - API for the application and its handlers
//! - Driven Ports (outbound) - the broker client the engine calls into

pub mod inbound;
pub mod outbound;

pub use inbound::{MessageHandler, PubSubApi};
pub use outbound::{
    BrokerAdmin, BrokerClient, ClientFactory, Credentials, DialOptions, ReceivedMessage,
    SubscriptionHandle, SubscriptionSettings, TopicHandle,
};
