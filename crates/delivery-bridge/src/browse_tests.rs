//! Tests for the browsing consumer and scans.

use super::*;
use crate::convert::StandardConverter;
use crate::message::{
    BasicProperties, ConsumerMessage, DeliveryTag, Envelope, HeaderValue, Headers, MessageBody,
};
use crate::providers::InMemoryChannel;
use bytes::Bytes;
use std::time::Instant;

// ============================================================================
// Helper Functions
// ============================================================================

fn queue() -> QueueName {
    QueueName::new("inventory".to_string()).unwrap()
}

fn converter() -> SharedConverter<ConsumerMessage> {
    Arc::new(StandardConverter::new())
}

fn colored(color: &str) -> BasicProperties {
    BasicProperties::new()
        .with_content_type("text/plain")
        .with_header("color", color)
}

fn delivery(tag: u64, color: &str, body: &'static str) -> Delivery {
    Delivery::new(
        Envelope::new(DeliveryTag::new(tag), "", "inventory"),
        colored(color),
        Bytes::from_static(body.as_bytes()),
    )
}

fn red_only() -> SharedSelector {
    Arc::new(|headers: &Headers| headers.get("color").and_then(HeaderValue::as_str) == Some("red"))
}

fn browser(
    channel: &Arc<InMemoryChannel>,
    expected: usize,
    selector: Option<SharedSelector>,
) -> BrowsingConsumer<ConsumerMessage> {
    BrowsingConsumer::new(channel.clone(), converter(), expected, selector)
}

fn bodies(messages: &[ConsumerMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|m| match &m.body {
            MessageBody::Text(text) => text.clone(),
            MessageBody::Bytes(_) => panic!("expected text body"),
        })
        .collect()
}

// ============================================================================
// Scan Outcome Tests
// ============================================================================

mod outcome {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert!(ScanOutcome::Exhausted.is_completed());
        assert!(ScanOutcome::Exhausted.is_finished());
        assert!(ScanOutcome::Cancelled.is_completed());
        assert!(!ScanOutcome::Cancelled.is_finished());
        assert!(!ScanOutcome::TimedOut.is_completed());
        assert!(!ScanOutcome::TimedOut.is_finished());
    }

    #[test]
    fn test_request_from_config_applies_cap() {
        let config = BrowseConfig {
            timeout_ms: 250,
            max_messages: 10,
        };

        let request = ScanRequest::from_config(50, &config);
        assert_eq!(request.expected_count, 10);
        assert_eq!(request.timeout, Duration::from_millis(250));
        assert!(request.selector.is_none());

        let request = ScanRequest::from_config(3, &config);
        assert_eq!(request.expected_count, 3);
    }

    #[test]
    fn test_request_defaults() {
        let request = ScanRequest::new(5).with_timeout(Duration::from_millis(50));
        assert_eq!(request.expected_count, 5);
        assert_eq!(request.timeout, Duration::from_millis(50));
    }
}

// ============================================================================
// Browsing Consumer Tests
// ============================================================================

mod browsing_consumer {
    use super::*;

    /// The scan collects exactly the expected messages, in order, then cancels.
    #[tokio::test]
    async fn test_budget_exhaustion_cancels_consumer() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 3, None);
        let tag = consumer.consumer_tag().clone();

        for (i, body) in ["a", "b", "c", "d"].into_iter().enumerate() {
            consumer
                .handle_delivery(&tag, delivery(i as u64 + 1, "red", body))
                .await
                .unwrap();
        }

        assert_eq!(
            consumer.await_completion(Duration::from_millis(100)).await,
            ScanOutcome::Exhausted
        );
        assert_eq!(consumer.remaining(), 0);
        assert_eq!(channel.cancel_count(&tag), 1);
        assert_eq!(consumer.state(), ConsumerState::CancelRequested);

        let messages = consumer.take_messages();
        assert_eq!(bodies(&messages), ["a", "b", "c"]);
    }

    /// Browsing never acknowledges or rejects anything.
    #[tokio::test]
    async fn test_browsing_is_non_destructive() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 2, Some(red_only()));
        let tag = consumer.consumer_tag().clone();

        consumer
            .handle_delivery(&tag, delivery(1, "blue", "x"))
            .await
            .unwrap();
        consumer
            .handle_delivery(&tag, delivery(2, "red", "y"))
            .await
            .unwrap();

        assert!(channel.acked().is_empty());
        assert!(channel.nacked().is_empty());
    }

    /// Two matches, one non-match, then a broker cancel before the budget is spent.
    #[tokio::test]
    async fn test_broker_cancel_returns_partial_results() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = Arc::new(browser(&channel, 5, Some(red_only())));
        let tag = consumer.consumer_tag().clone();

        consumer
            .handle_delivery(&tag, delivery(1, "red", "r1"))
            .await
            .unwrap();
        consumer
            .handle_delivery(&tag, delivery(2, "blue", "b1"))
            .await
            .unwrap();
        consumer
            .handle_delivery(&tag, delivery(3, "red", "r2"))
            .await
            .unwrap();
        assert!(!consumer.is_done());
        consumer.handle_cancel(&tag);
        assert!(consumer.is_done());

        assert_eq!(
            consumer.await_completion(Duration::from_millis(100)).await,
            ScanOutcome::Cancelled
        );
        assert_eq!(consumer.remaining(), 3);
        assert_eq!(bodies(&consumer.take_messages()), ["r1", "r2"]);

        let metrics = consumer.metrics();
        assert_eq!(metrics.filtered, 1);
        assert_eq!(metrics.accepted, 2);
        assert_eq!(metrics.state, ConsumerState::Cancelled);
    }

    /// Deliveries arriving after cancellation are neither collected nor settled.
    #[tokio::test]
    async fn test_delivery_after_cancel_is_ignored() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 3, None);
        let tag = consumer.consumer_tag().clone();

        consumer
            .handle_delivery(&tag, delivery(1, "red", "before"))
            .await
            .unwrap();
        consumer.handle_cancel(&tag);
        consumer
            .handle_delivery(&tag, delivery(2, "red", "after"))
            .await
            .unwrap();

        assert_eq!(consumer.collected(), 1);
        assert_eq!(consumer.remaining(), 2);
        assert_eq!(bodies(&consumer.take_messages()), ["before"]);
        assert!(channel.commands().is_empty());

        let metrics = consumer.metrics();
        assert_eq!(metrics.accepted, 1);
        assert_eq!(metrics.rejected_after_cancel, 1);
    }

    #[tokio::test]
    async fn test_await_completion_times_out() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 2, None);
        let tag = consumer.consumer_tag().clone();

        consumer
            .handle_delivery(&tag, delivery(1, "red", "only"))
            .await
            .unwrap();

        let start = Instant::now();
        let outcome = consumer.await_completion(Duration::from_millis(100)).await;

        assert_eq!(outcome, ScanOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(consumer.collected(), 1);
        assert_eq!(consumer.remaining(), 1);
    }

    #[tokio::test]
    async fn test_zero_expected_completes_immediately() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 0, None);

        assert_eq!(
            consumer.await_completion(Duration::from_millis(10)).await,
            ScanOutcome::Exhausted
        );

        let tag = consumer.consumer_tag().clone();
        consumer
            .handle_delivery(&tag, delivery(1, "red", "ignored"))
            .await
            .unwrap();
        assert_eq!(consumer.collected(), 0);
    }

    #[tokio::test]
    async fn test_conversion_failure_does_not_spend_budget() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 1, None);
        let tag = consumer.consumer_tag().clone();

        let bad = Delivery::new(
            Envelope::new(DeliveryTag::new(1), "", "inventory"),
            BasicProperties::new().with_content_type("application/json"),
            Bytes::from_static(b"{not json"),
        );

        assert!(matches!(
            consumer.handle_delivery(&tag, bad).await,
            Err(ConsumerError::Conversion(_))
        ));
        assert_eq!(consumer.remaining(), 1);
        assert_eq!(consumer.metrics().conversion_failures, 1);
    }

    #[tokio::test]
    async fn test_cancel_is_sent_once() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 1, None);
        let tag = consumer.consumer_tag().clone();

        consumer.cancel().await.unwrap();
        consumer.cancel().await.unwrap();

        assert_eq!(channel.cancel_count(&tag), 1);
    }

    #[tokio::test]
    async fn test_cancel_failure_releases_waiters() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = browser(&channel, 4, None);
        channel.close();

        assert!(consumer.cancel().await.is_err());
        assert_eq!(consumer.state(), ConsumerState::Cancelled);
        assert_eq!(
            consumer.await_completion(Duration::from_millis(10)).await,
            ScanOutcome::Cancelled
        );
    }
}

// ============================================================================
// Scan Tests
// ============================================================================

mod scan {
    use super::*;

    fn publish(channel: &InMemoryChannel, color: &str, body: &'static str) {
        channel.publish(&queue(), colored(color), Bytes::from_static(body.as_bytes()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_collects_matching_messages() {
        let channel = Arc::new(InMemoryChannel::new());
        publish(&channel, "red", "r1");
        publish(&channel, "blue", "b1");
        publish(&channel, "red", "r2");
        publish(&channel, "red", "r3");

        let request = ScanRequest::new(2)
            .with_selector(red_only())
            .with_timeout(Duration::from_secs(1));
        let result = scan_and_wait(channel.clone(), &queue(), converter(), request)
            .await
            .unwrap();

        assert_eq!(result.outcome, ScanOutcome::Exhausted);
        assert_eq!(bodies(&result.messages), ["r1", "r2"]);

        // Nothing was consumed
        assert_eq!(channel.queue_depth(&queue()), 4);
        assert!(channel.acked().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_times_out_with_partial_results() {
        let channel = Arc::new(InMemoryChannel::new());
        publish(&channel, "red", "r1");

        let request = ScanRequest::new(3).with_timeout(Duration::from_millis(100));
        let result = scan_and_wait(channel.clone(), &queue(), converter(), request)
            .await
            .unwrap();

        assert_eq!(result.outcome, ScanOutcome::TimedOut);
        assert_eq!(bodies(&result.messages), ["r1"]);
        assert_eq!(
            channel
                .commands()
                .iter()
                .filter(|c| matches!(c, crate::providers::ChannelCommand::Cancel { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_scan_for_zero_messages_does_not_subscribe() {
        let channel = Arc::new(InMemoryChannel::new());
        publish(&channel, "red", "r1");

        let result = scan_and_wait(channel.clone(), &queue(), converter(), ScanRequest::new(0))
            .await
            .unwrap();

        assert_eq!(result.outcome, ScanOutcome::Exhausted);
        assert!(result.messages.is_empty());
        assert!(channel.commands().is_empty());
    }

    #[tokio::test]
    async fn test_scan_on_closed_channel_fails() {
        let channel = Arc::new(InMemoryChannel::new());
        channel.close();

        let result = scan_and_wait(channel, &queue(), converter(), ScanRequest::new(1)).await;
        assert!(matches!(
            result,
            Err(ConsumerError::Transport(TransportError::ChannelClosed))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_scans_see_same_messages() {
        let channel = Arc::new(InMemoryChannel::new());
        publish(&channel, "red", "r1");
        publish(&channel, "red", "r2");

        for _ in 0..2 {
            let request = ScanRequest::new(2).with_timeout(Duration::from_secs(1));
            let result = scan_and_wait(channel.clone(), &queue(), converter(), request)
                .await
                .unwrap();
            assert_eq!(bodies(&result.messages), ["r1", "r2"]);
        }
    }
}
