//! Message entity crossing the engine boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Unit of application payload.
///
/// `delivery_attempt` is owned by the broker: 1 on first delivery and
/// incremented on each redelivery. It is zero on messages being published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned identifier; empty until published.
    pub id: String,
    /// Opaque payload.
    pub data: Vec<u8>,
    /// String attributes; keys are unique, order is irrelevant.
    pub attributes: HashMap<String, String>,
    /// Empty means no ordering constraint.
    pub ordering_key: String,
    /// Caller-supplied idempotency hint, opaque to the engine.
    pub event_id: String,
    /// Broker-maintained delivery counter.
    pub delivery_attempt: u32,
    /// Set by the broker when the message was accepted.
    pub publish_time: Option<SystemTime>,
}

impl Message {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = key.into();
        self
    }

    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Payload size in bytes, as reported to publish telemetry.
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }

    /// Size counted against the outstanding-bytes budget.
    pub fn size(&self) -> usize {
        let attributes: usize = self
            .attributes
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        self.data.len() + attributes + self.ordering_key.len()
    }

    /// Whether this message is subject to per-key ordering.
    pub fn is_ordered(&self) -> bool {
        !self.ordering_key.is_empty()
    }

    /// Drop the ordering key. Applied whenever ordering is disabled.
    pub fn clear_ordering_key(&mut self) {
        self.ordering_key.clear();
    }
}
