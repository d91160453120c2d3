//! Engine configuration and its normalization.
//!
//! A caller supplies a sparse [`PubSubConfig`]; [`normalize`] turns it into a
//! fully-resolved [`ResolvedConfig`] with defaults filled in, tri-state
//! switches resolved and incompatible combinations corrected. Normalization
//! never fails. Identity checks happen separately in
//! [`ResolvedConfig::validate`].
//!
//! # Example
//!
//! ```ignore
//! use gcpubsub::domain::{PubSubConfig, Switch};
//!
//! let resolved = PubSubConfig::new("my-project")
//!     .with_topic("orders")
//!     .with_subscription("orders-worker")
//!     .with_ordering(Switch::Disabled)
//!     .normalize();
//! assert!(!resolved.ordering_enabled);
//! ```

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

use super::errors::PubSubError;

/// Publish timeout applied when none (or zero) is configured.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
/// Dispatch workers applied when the configured count is not positive.
pub const DEFAULT_NUM_WORKERS: usize = 1;
/// Outstanding-message cap applied when the configured cap is not positive.
pub const DEFAULT_MAX_OUTSTANDING_MESSAGES: usize = 1000;
/// Outstanding-byte cap applied when the configured cap is zero.
pub const DEFAULT_MAX_OUTSTANDING_BYTES: usize = 1_000_000_000;
/// Total lease-extension budget per message.
pub const DEFAULT_MAX_EXTENSION: Duration = Duration::from_secs(60 * 60);
/// Lease-extension interval when no explicit period is configured.
pub const DEFAULT_MIN_EXTENSION_PERIOD: Duration = Duration::from_secs(10);

/// Three-valued switch: unset, on, off.
///
/// Deserializes from an optional boolean (`null`/missing, `true`, `false`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Switch {
    #[default]
    Unspecified,
    Enabled,
    Disabled,
}

impl Switch {
    /// Resolve to a boolean, using `default` when unset.
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Switch::Unspecified => default,
            Switch::Enabled => true,
            Switch::Disabled => false,
        }
    }
}

impl From<Option<bool>> for Switch {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Switch::Unspecified,
            Some(true) => Switch::Enabled,
            Some(false) => Switch::Disabled,
        }
    }
}

impl From<Switch> for Option<bool> {
    fn from(value: Switch) -> Self {
        match value {
            Switch::Unspecified => None,
            Switch::Enabled => Some(true),
            Switch::Disabled => Some(false),
        }
    }
}

impl From<bool> for Switch {
    fn from(value: bool) -> Self {
        if value {
            Switch::Enabled
        } else {
            Switch::Disabled
        }
    }
}

/// Caller-supplied configuration. All fields optional.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    pub project_id: String,
    pub topic_id: String,
    /// Requires `topic_id`.
    pub subscription_id: String,
    /// Non-empty forces exactly-once delivery off.
    pub emulator_endpoint: String,

    pub exactly_once_delivery: Switch,
    /// Default: enabled.
    pub ordering: Switch,
    /// Default: enabled.
    pub logging: Switch,
    /// Default: enabled.
    pub metrics: Switch,

    /// Zero means default.
    #[serde(rename = "publish_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub publish_timeout: Duration,

    /// `<= 0` means default.
    pub num_workers: i32,
    /// `<= 0` means default.
    pub max_outstanding_messages: i64,
    /// Zero means default, negative means no byte cap.
    pub max_outstanding_bytes: i64,

    /// Zero means default.
    #[serde(rename = "max_extension_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_extension: Duration,
    /// Zero means the broker default (see `min_extension_period`).
    #[serde(rename = "max_extension_period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_extension_period: Duration,
    /// Zero means default.
    #[serde(rename = "min_extension_period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_extension_period: Duration,
}

impl PubSubConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = topic_id.into();
        self
    }

    #[must_use]
    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = subscription_id.into();
        self
    }

    #[must_use]
    pub fn with_emulator(mut self, endpoint: impl Into<String>) -> Self {
        self.emulator_endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_exactly_once(mut self, switch: impl Into<Switch>) -> Self {
        self.exactly_once_delivery = switch.into();
        self
    }

    #[must_use]
    pub fn with_ordering(mut self, switch: impl Into<Switch>) -> Self {
        self.ordering = switch.into();
        self
    }

    #[must_use]
    pub fn with_logging(mut self, switch: impl Into<Switch>) -> Self {
        self.logging = switch.into();
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, switch: impl Into<Switch>) -> Self {
        self.metrics = switch.into();
        self
    }

    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_num_workers(mut self, workers: i32) -> Self {
        self.num_workers = workers;
        self
    }

    #[must_use]
    pub fn with_max_outstanding_messages(mut self, max: i64) -> Self {
        self.max_outstanding_messages = max;
        self
    }

    #[must_use]
    pub fn with_max_outstanding_bytes(mut self, max: i64) -> Self {
        self.max_outstanding_bytes = max;
        self
    }

    #[must_use]
    pub fn with_max_extension(mut self, max: Duration) -> Self {
        self.max_extension = max;
        self
    }

    #[must_use]
    pub fn with_extension_periods(mut self, min: Duration, max: Duration) -> Self {
        self.min_extension_period = min;
        self.max_extension_period = max;
        self
    }

    /// Resolve defaults. See [`normalize`].
    pub fn normalize(&self) -> ResolvedConfig {
        normalize(self)
    }
}

/// Fully-resolved configuration. Immutable for the lifetime of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub project_id: String,
    pub topic_id: String,
    pub subscription_id: String,
    pub emulator_endpoint: String,
    pub exactly_once_delivery: bool,
    pub ordering_enabled: bool,
    pub logging_enabled: bool,
    pub metrics_enabled: bool,
    pub publish_timeout: Duration,
    pub num_workers: usize,
    pub max_outstanding_messages: usize,
    /// `None` means no byte cap.
    pub max_outstanding_bytes: Option<usize>,
    pub max_extension: Duration,
    /// Zero when unset; see [`ResolvedConfig::lease_extension_period`].
    pub max_extension_period: Duration,
    pub min_extension_period: Duration,
}

impl ResolvedConfig {
    /// Reject identity combinations that cannot be corrected.
    pub fn validate(&self) -> Result<(), PubSubError> {
        if self.project_id.is_empty() {
            return Err(PubSubError::Configuration("project id is required".to_string()));
        }
        if !self.subscription_id.is_empty() && self.topic_id.is_empty() {
            return Err(PubSubError::Configuration(format!(
                "subscription {:?} configured without a topic",
                self.subscription_id
            )));
        }
        Ok(())
    }

    pub fn publisher_enabled(&self) -> bool {
        !self.topic_id.is_empty()
    }

    pub fn subscriber_enabled(&self) -> bool {
        !self.subscription_id.is_empty()
    }

    pub fn uses_emulator(&self) -> bool {
        !self.emulator_endpoint.is_empty()
    }

    /// Interval between lease extensions of an in-flight message.
    ///
    /// The explicit period when set, never shorter than the minimum period.
    pub fn lease_extension_period(&self) -> Duration {
        if self.max_extension_period.is_zero() {
            self.min_extension_period
        } else {
            self.max_extension_period.max(self.min_extension_period)
        }
    }
}

/// Turn a sparse configuration into a resolved one. Total and pure.
pub fn normalize(raw: &PubSubConfig) -> ResolvedConfig {
    let publish_timeout = if raw.publish_timeout.is_zero() {
        DEFAULT_PUBLISH_TIMEOUT
    } else {
        raw.publish_timeout
    };

    let num_workers = usize::try_from(raw.num_workers)
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_NUM_WORKERS);

    let max_outstanding_messages = usize::try_from(raw.max_outstanding_messages)
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_OUTSTANDING_MESSAGES);

    let max_outstanding_bytes = match raw.max_outstanding_bytes {
        0 => Some(DEFAULT_MAX_OUTSTANDING_BYTES),
        n if n < 0 => None,
        n => Some(usize::try_from(n).unwrap_or(usize::MAX)),
    };

    // Emulators do not support exactly-once delivery.
    let exactly_once_delivery =
        raw.emulator_endpoint.is_empty() && raw.exactly_once_delivery.resolve(false);

    ResolvedConfig {
        project_id: raw.project_id.clone(),
        topic_id: raw.topic_id.clone(),
        subscription_id: raw.subscription_id.clone(),
        emulator_endpoint: raw.emulator_endpoint.clone(),
        exactly_once_delivery,
        ordering_enabled: raw.ordering.resolve(true),
        logging_enabled: raw.logging.resolve(true),
        metrics_enabled: raw.metrics.resolve(true),
        publish_timeout,
        num_workers,
        max_outstanding_messages,
        max_outstanding_bytes,
        max_extension: if raw.max_extension.is_zero() {
            DEFAULT_MAX_EXTENSION
        } else {
            raw.max_extension
        },
        max_extension_period: raw.max_extension_period,
        min_extension_period: if raw.min_extension_period.is_zero() {
            DEFAULT_MIN_EXTENSION_PERIOD
        } else {
            raw.min_extension_period
        },
    }
}
