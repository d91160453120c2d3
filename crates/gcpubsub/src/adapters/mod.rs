//! Adapters Layer (Driven Adapters)
//!
//! Implementations of the outbound broker ports.
//!
//! ## Adapters
//!
//! - `InMemoryBroker` - in-process broker emulator (topics, subscriptions,
//!   leases, redelivery, ordering keys)
//! - `InMemoryClient` / `InMemoryClientFactory` - broker client over it

pub mod client;
pub mod emulator;

pub use client::{InMemoryClient, InMemoryClientFactory, InMemorySubscription, InMemoryTopic};
pub use emulator::InMemoryBroker;
