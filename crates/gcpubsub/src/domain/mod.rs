//! Domain Layer
//!
//! Pure types and rules, no I/O: configuration normalization, the message
//! entity and the error taxonomy.

pub mod config;
pub mod errors;
pub mod message;

pub use config::{normalize, PubSubConfig, ResolvedConfig, Switch};
pub use errors::{BrokerError, DispatchFailure, HandlerError, PubSubError, PUBLISHER_DISABLED_MESSAGE};
pub use message::Message;
