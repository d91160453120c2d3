//! # gcpubsub
//!
//! Managed publish/receive engine over a remote message broker.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure types and rules, no I/O
//!   - `PubSubConfig` / `ResolvedConfig`: sparse config and its normalized form
//!   - `Message`: payload, attributes, ordering key, delivery attempt
//!   - `PubSubError`, `BrokerError`, `DispatchFailure`: error taxonomy
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `PubSubApi`, `MessageHandler`: driving ports
//!   - `ClientFactory`, `BrokerClient`, `TopicHandle`, `SubscriptionHandle`,
//!     `BrokerAdmin`: driven ports
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `Publisher`: publish with timeout, cancellation and telemetry
//!   - `Dispatcher`: pull loop with outstanding caps, per-key ordering,
//!     abort isolation and lease extension
//!   - `Component`: implements `PubSubApi` over an injected client factory
//!
//! - **Adapters Layer** (`adapters/`): In-process broker emulator and client
//!
//! - **Metrics** (`metrics.rs`): `PubSubMetrics`, one instrument set per
//!   Prometheus registry, and the `TelemetryRecorder` each component reports through
//!
//! ## Invariants
//!
//! - A handler returning `Ok(())` acks its message; an error or panic nacks it
//!   and the broker redelivers with a higher `delivery_attempt`.
//! - With ordering disabled every message reaches the handler with an empty
//!   ordering key.
//! - Publishing with no topic fails with exactly `gcpubsub: publisher disabled`.
//!
//! ## Usage Example
//!
//! ```ignore
//! use gcpubsub::{Component, ComponentDeps, InMemoryBroker, InMemoryClientFactory, Message, PubSubApi, PubSubConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let factory = Arc::new(InMemoryClientFactory::new(InMemoryBroker::new()));
//! let config = PubSubConfig::new("my-project")
//!     .with_topic("orders")
//!     .with_subscription("orders-worker");
//! let component = Component::new(&config, ComponentDeps::new(factory)).await?;
//!
//! component.publish(&CancellationToken::new(), Message::new("hello")).await?;
//!
//! let token = CancellationToken::new();
//! component
//!     .receive(token.clone(), Arc::new(|message: Message| async move {
//!         println!("got {}", message.id);
//!         Ok(())
//!     }))
//!     .await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-exports for convenience
pub use adapters::{InMemoryBroker, InMemoryClient, InMemoryClientFactory};
pub use domain::{
    normalize, BrokerError, DispatchFailure, HandlerError, Message, PubSubConfig, PubSubError,
    ResolvedConfig, Switch, PUBLISHER_DISABLED_MESSAGE,
};
pub use metrics::{Outcome, PubSubMetrics, TelemetryRecorder};
pub use ports::{
    BrokerAdmin, BrokerClient, ClientFactory, Credentials, DialOptions, MessageHandler, PubSubApi,
    ReceivedMessage, SubscriptionHandle, SubscriptionSettings, TopicHandle,
};
pub use service::{ensure_resources, Component, ComponentDeps, Dispatcher, Publisher};
