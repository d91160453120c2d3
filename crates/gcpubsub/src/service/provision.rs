//! Topic/subscription provisioning for setup code and tests.
//!
//! Not used on the publish/receive path.

use crate::domain::{BrokerError, PubSubError, ResolvedConfig};
use crate::ports::{BrokerAdmin, SubscriptionSettings};

/// Create the configured topic and subscription if they do not exist yet.
///
/// The subscription inherits the resolved ordering and exactly-once switches.
/// A concurrent creator winning the race is not an error.
pub async fn ensure_resources(
    admin: &dyn BrokerAdmin,
    config: &ResolvedConfig,
) -> Result<(), PubSubError> {
    if config.publisher_enabled() && !admin.topic_exists(&config.topic_id).await? {
        tolerate_existing(admin.create_topic(&config.topic_id).await)?;
        tracing::info!(topic = %config.topic_id, "Created topic");
    }

    if config.subscriber_enabled() && !admin.subscription_exists(&config.subscription_id).await? {
        let settings = SubscriptionSettings {
            enable_message_ordering: config.ordering_enabled,
            enable_exactly_once_delivery: config.exactly_once_delivery,
            ..SubscriptionSettings::new(config.topic_id.clone())
        };
        tolerate_existing(
            admin
                .create_subscription(&config.subscription_id, settings)
                .await,
        )?;
        tracing::info!(
            subscription = %config.subscription_id,
            topic = %config.topic_id,
            "Created subscription"
        );
    }

    Ok(())
}

fn tolerate_existing(result: Result<(), BrokerError>) -> Result<(), BrokerError> {
    match result {
        Err(BrokerError::AlreadyExists(_)) => Ok(()),
        other => other,
    }
}
