//! # Telemetry Flows
//!
//! Publish and receive measurements recorded into the component's registry.

#[cfg(test)]
mod tests {
    use gcpubsub::metrics::{
        ACK_LATENCY_MS, DELIVERY_ATTEMPT_LABEL, DELIVERY_ATTEMPT_TOTAL, HANDLER_DURATION_MS,
        OUTSTANDING_MESSAGES, PUBLISH_LATENCY_MS, PUBLISH_PAYLOAD_BYTES, PUBLISH_TOTAL,
        RECEIVE_TOTAL, RESULT_LABEL,
    };
    use gcpubsub::{Message, PubSubApi, PubSubError, Switch};
    use pubsub_telemetry::encode_metrics;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use crate::fixtures::{
        base_config, counter_value, histogram_count, publish, wait_until, ReceiveTask, Script,
        ScriptedHandler, TestBed, PROJECT, SUBSCRIPTION,
    };
    use gcpubsub::PubSubConfig;

    /// Exposition lines of `metric` carrying `label="value"`.
    fn series(text: &str, metric: &str, label: &str, value: &str) -> usize {
        let needle = format!("{label}=\"{value}\"");
        text.lines()
            .filter(|line| line.starts_with(metric) && line.contains(&needle))
            .count()
    }

    #[tokio::test]
    async fn test_publish_success_and_failure_are_recorded() {
        let bed = TestBed::new();
        let component = bed
            .component(&base_config().with_publish_timeout(Duration::from_millis(20)))
            .await;

        publish(&component, Message::new("fine")).await;
        bed.broker().set_publish_delay(Duration::from_millis(300));
        let err = component
            .publish(&CancellationToken::new(), Message::new("times out"))
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::DeadlineExceeded));

        let registry = &bed.registry;
        assert_eq!(counter_value(registry, PUBLISH_TOTAL, RESULT_LABEL, "success"), 1);
        assert_eq!(counter_value(registry, PUBLISH_TOTAL, RESULT_LABEL, "error"), 1);
        assert_eq!(histogram_count(registry, PUBLISH_LATENCY_MS), 2);
        assert_eq!(histogram_count(registry, PUBLISH_PAYLOAD_BYTES), 2);
    }

    #[tokio::test]
    async fn test_receive_outcomes_are_recorded() {
        let bed = TestBed::new();
        let component = bed.component(&base_config()).await;
        let handler = ScriptedHandler::new(Script::FailFirst(1));
        let receiver = ReceiveTask::spawn(&component, handler.clone());

        publish(&component, Message::new("retry me")).await;
        wait_until("ack", || bed.broker().acked_count(SUBSCRIPTION) == 1).await;
        receiver.stop().await.unwrap_err();

        let registry = &bed.registry;
        assert_eq!(counter_value(registry, RECEIVE_TOTAL, RESULT_LABEL, "success"), 1);
        assert_eq!(counter_value(registry, RECEIVE_TOTAL, RESULT_LABEL, "error"), 1);
        assert_eq!(counter_value(registry, DELIVERY_ATTEMPT_TOTAL, DELIVERY_ATTEMPT_LABEL, "1"), 1);
        assert_eq!(counter_value(registry, DELIVERY_ATTEMPT_TOTAL, DELIVERY_ATTEMPT_LABEL, "2"), 1);
        assert_eq!(histogram_count(registry, HANDLER_DURATION_MS), 2);
        assert_eq!(histogram_count(registry, ACK_LATENCY_MS), 2);
    }

    #[tokio::test]
    async fn test_metrics_switch_off_records_nothing() {
        let bed = TestBed::new();
        let component = bed
            .component(&base_config().with_metrics(Switch::Disabled))
            .await;
        let handler = ScriptedHandler::new(Script::Ack);
        let receiver = ReceiveTask::spawn(&component, handler.clone());

        publish(&component, Message::new("quiet")).await;
        wait_until("ack", || bed.broker().acked_count(SUBSCRIPTION) == 1).await;
        receiver.stop().await.unwrap_err();

        assert!(bed.registry.gather().is_empty());
    }

    #[tokio::test]
    async fn test_exposition_text_and_gauge_lifecycle() {
        let bed = TestBed::new();
        let component = bed.component(&base_config()).await;
        let handler = ScriptedHandler::new(Script::Ack);
        let receiver = ReceiveTask::spawn(&component, handler.clone());

        publish(&component, Message::new("scrape me")).await;
        wait_until("ack", || bed.broker().acked_count(SUBSCRIPTION) == 1).await;
        receiver.stop().await.unwrap_err();

        let text = encode_metrics(&bed.registry).expect("encode");
        for name in [
            PUBLISH_TOTAL,
            PUBLISH_LATENCY_MS,
            PUBLISH_PAYLOAD_BYTES,
            RECEIVE_TOTAL,
            DELIVERY_ATTEMPT_TOTAL,
            HANDLER_DURATION_MS,
            ACK_LATENCY_MS,
            OUTSTANDING_MESSAGES,
        ] {
            assert!(text.contains(name), "{name} missing from exposition");
        }
        assert!(text.contains("pubsub_result=\"success\""));

        component.shutdown().await.expect("shutdown");
        let text = encode_metrics(&bed.registry).expect("encode");
        assert!(!text.contains(OUTSTANDING_MESSAGES));
    }

    #[tokio::test]
    async fn test_components_sharing_a_registry_all_report() {
        let bed = TestBed::new();
        let orders = bed.component(&base_config()).await;
        let invoices = bed
            .component(
                &PubSubConfig::new(PROJECT)
                    .with_topic("invoices")
                    .with_subscription("invoices-worker"),
            )
            .await;

        publish(&orders, Message::new("o")).await;
        publish(&invoices, Message::new("i")).await;
        for (component, subscription) in [(&orders, SUBSCRIPTION), (&invoices, "invoices-worker")] {
            let receiver = ReceiveTask::spawn(component, ScriptedHandler::new(Script::Ack));
            wait_until("ack", || bed.broker().acked_count(subscription) == 1).await;
            receiver.stop().await.unwrap_err();
        }

        let text = encode_metrics(&bed.registry).expect("encode");
        assert_eq!(series(&text, PUBLISH_TOTAL, "topic", "orders"), 1);
        assert_eq!(series(&text, PUBLISH_TOTAL, "topic", "invoices"), 1);
        assert_eq!(series(&text, RECEIVE_TOTAL, "subscription", SUBSCRIPTION), 1);
        assert_eq!(series(&text, RECEIVE_TOTAL, "subscription", "invoices-worker"), 1);
        assert_eq!(series(&text, OUTSTANDING_MESSAGES, "subscription", SUBSCRIPTION), 1);
        assert_eq!(series(&text, OUTSTANDING_MESSAGES, "subscription", "invoices-worker"), 1);

        // The gauge stays registered until the last component sharing it shuts down.
        orders.shutdown().await.expect("shutdown");
        let text = encode_metrics(&bed.registry).expect("encode");
        assert_eq!(series(&text, OUTSTANDING_MESSAGES, "subscription", SUBSCRIPTION), 0);
        assert_eq!(series(&text, OUTSTANDING_MESSAGES, "subscription", "invoices-worker"), 1);

        invoices.shutdown().await.expect("shutdown");
        let text = encode_metrics(&bed.registry).expect("encode");
        assert!(!text.contains(OUTSTANDING_MESSAGES));
    }
}
