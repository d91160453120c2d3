//! Service Layer
//!
//! Orchestrates the domain against the broker ports:
//! - `Publisher` - timed, cancellable publish with telemetry
//! - `Dispatcher` - pull loop, backpressure, per-key ordering, ack/nack
//! - `Component` - connects a client and owns both sides

pub mod component;
pub mod dispatcher;
mod flow_control;
mod ordering;
pub mod provision;
pub mod publisher;

pub use component::{Component, ComponentDeps};
pub use dispatcher::Dispatcher;
pub use provision::ensure_resources;
pub use publisher::Publisher;
