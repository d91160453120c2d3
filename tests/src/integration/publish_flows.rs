//! # Publish Flows
//!
//! Publisher behaviour through the component API: disabled publisher,
//! cancellation without a broker call, timeouts and ordering keys.

#[cfg(test)]
mod tests {
    use gcpubsub::{
        Message, PubSubApi, PubSubConfig, PubSubError, Switch, PUBLISHER_DISABLED_MESSAGE,
    };
    use pubsub_telemetry::{TraceParent, TRACEPARENT_ATTRIBUTE};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use crate::fixtures::{
        base_config, publish, wait_until, ReceiveTask, Script, ScriptedHandler, TestBed, PROJECT,
        SUBSCRIPTION,
    };

    #[tokio::test]
    async fn test_publish_without_topic_reports_disabled() {
        let bed = TestBed::new();
        let component = bed.component(&PubSubConfig::new(PROJECT)).await;

        let err = component
            .publish(&CancellationToken::new(), Message::new("nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::PublisherDisabled));
        assert_eq!(err.to_string(), "gcpubsub: publisher disabled");
        assert_eq!(err.to_string(), PUBLISHER_DISABLED_MESSAGE);
        assert_eq!(bed.broker().publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_publish_makes_no_broker_call() {
        let bed = TestBed::new();
        let component = bed.component(&base_config()).await;
        let token = CancellationToken::new();
        token.cancel();

        let err = component
            .publish(&token, Message::new("too late"))
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::Cancelled));
        assert!(err.is_cancellation());
        assert!(!err.is_retryable());
        assert_eq!(bed.broker().publish_calls(), 0);
        assert_eq!(bed.broker().pending_count(SUBSCRIPTION), 0);
    }

    #[tokio::test]
    async fn test_slow_broker_hits_publish_timeout() {
        let bed = TestBed::new();
        let component = bed
            .component(&base_config().with_publish_timeout(Duration::from_millis(25)))
            .await;
        bed.broker().set_publish_delay(Duration::from_millis(500));

        let err = component
            .publish(&CancellationToken::new(), Message::new("slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::DeadlineExceeded));
        assert_eq!(bed.broker().publish_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_publishers_get_distinct_ids() {
        let bed = TestBed::new();
        let component = bed.component(&base_config()).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let component = component.clone();
            handles.push(tokio::spawn(async move {
                publish(&component, Message::new(format!("m{i}"))).await
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join"));
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(bed.broker().pending_count(SUBSCRIPTION), 16);
    }

    #[tokio::test]
    async fn test_disabled_ordering_strips_key_end_to_end() {
        let bed = TestBed::new();
        let component = bed
            .component(&base_config().with_ordering(Switch::Disabled))
            .await;
        let handler = ScriptedHandler::new(Script::Ack);
        let receiver = ReceiveTask::spawn(&component, handler.clone());

        for key in ["customer-1", "customer-2", ""] {
            publish(&component, Message::new("payload").with_ordering_key(key)).await;
        }
        wait_until("three deliveries", || handler.delivery_count() == 3).await;
        receiver.stop().await.unwrap_err();

        assert!(handler
            .deliveries()
            .iter()
            .all(|message| message.ordering_key.is_empty()));
    }

    #[tokio::test]
    async fn test_traceparent_attribute_reaches_handler() {
        let bed = TestBed::new();
        let component = bed.component(&base_config()).await;
        let handler = ScriptedHandler::new(Script::Ack);
        let receiver = ReceiveTask::spawn(&component, handler.clone());

        let traceparent = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        publish(
            &component,
            Message::new("traced").with_attribute(TRACEPARENT_ATTRIBUTE, traceparent),
        )
        .await;
        wait_until("traced delivery", || handler.delivery_count() == 1).await;
        receiver.stop().await.unwrap_err();

        let delivered = handler.deliveries().remove(0);
        let value = delivered
            .attributes
            .get(TRACEPARENT_ATTRIBUTE)
            .expect("traceparent kept");
        let parsed = TraceParent::parse(value).expect("valid traceparent");
        assert_eq!(parsed.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[tokio::test]
    async fn test_flush_publisher_is_idempotent() {
        let bed = TestBed::new();
        let component = bed.component(&base_config()).await;
        publish(&component, Message::new("before flush")).await;

        let token = CancellationToken::new();
        component.flush_publisher(&token).await.expect("flush");
        component.flush_publisher(&token).await.expect("second flush");
        component.shutdown().await.expect("shutdown after flush");
        assert_eq!(bed.broker().pending_count(SUBSCRIPTION), 1);
    }
}
