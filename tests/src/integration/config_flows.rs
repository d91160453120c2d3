//! # Configuration Flows
//!
//! Normalization defaults and construction-time validation as seen through
//! a fully built component.

#[cfg(test)]
mod tests {
    use gcpubsub::domain::config::{
        DEFAULT_MAX_OUTSTANDING_MESSAGES, DEFAULT_NUM_WORKERS, DEFAULT_PUBLISH_TIMEOUT,
    };
    use gcpubsub::{Component, PubSubConfig, PubSubError, Switch};

    use crate::fixtures::{base_config, TestBed, PROJECT};

    #[tokio::test]
    async fn test_unset_fields_resolve_to_defaults() {
        let bed = TestBed::new();
        let component = bed.component(&base_config()).await;
        let resolved = component.config();

        assert_eq!(resolved.publish_timeout, DEFAULT_PUBLISH_TIMEOUT);
        assert!(resolved.publish_timeout > std::time::Duration::ZERO);
        assert!(resolved.ordering_enabled);
        assert!(resolved.logging_enabled);
        assert!(resolved.metrics_enabled);
        assert_eq!(resolved.num_workers, DEFAULT_NUM_WORKERS);
        assert_eq!(resolved.max_outstanding_messages, DEFAULT_MAX_OUTSTANDING_MESSAGES);
    }

    #[tokio::test]
    async fn test_emulator_forces_exactly_once_off() {
        let bed = TestBed::new();
        let config = base_config()
            .with_emulator("127.0.0.1:8085")
            .with_exactly_once(Switch::Enabled);
        let component = bed.component(&config).await;

        assert!(!component.config().exactly_once_delivery);
        let dial = bed.factory.dials().pop().expect("dialed");
        assert_eq!(dial.endpoint.as_deref(), Some("127.0.0.1:8085"));
        assert!(dial.insecure);
    }

    #[tokio::test]
    async fn test_exactly_once_kept_without_emulator() {
        let bed = TestBed::new();
        let component = bed
            .component(&base_config().with_exactly_once(true))
            .await;
        assert!(component.config().exactly_once_delivery);
        assert!(!bed.factory.dials()[0].insecure);
    }

    #[tokio::test]
    async fn test_subscription_without_topic_fails_construction() {
        let bed = TestBed::new();
        let config = PubSubConfig::new(PROJECT).with_subscription("lonely");
        let result = Component::new(&config, bed.deps()).await;
        assert!(matches!(result, Err(PubSubError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_construction() {
        let bed = TestBed::new();
        bed.factory.refuse_connections(true);
        let result = Component::new(&base_config(), bed.deps()).await;
        match result {
            Err(err) => assert!(!err.is_cancellation()),
            Ok(_) => panic!("connection should have been refused"),
        }
    }

    #[tokio::test]
    async fn test_config_from_json() {
        let bed = TestBed::new();
        let config: PubSubConfig = serde_json_config(
            r#"{
                "project_id": "test-project",
                "topic_id": "orders",
                "subscription_id": "orders-worker",
                "ordering": false,
                "num_workers": 4,
                "publish_timeout_ms": 2500
            }"#,
        );
        let component = bed.component(&config).await;
        let resolved = component.config();
        assert!(!resolved.ordering_enabled);
        assert_eq!(resolved.num_workers, 4);
        assert_eq!(resolved.publish_timeout.as_millis(), 2500);
    }

    fn serde_json_config(raw: &str) -> PubSubConfig {
        serde_json::from_str(raw).expect("valid config json")
    }
}
