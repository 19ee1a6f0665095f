//! Tests for header views and selectors.

use super::*;
use crate::message::{BasicProperties, DeliveryTag, MessageBody, Timestamp};

fn message_with(properties: BasicProperties, redelivered: bool) -> ConsumerMessage {
    ConsumerMessage {
        delivery_tag: DeliveryTag::new(1),
        redelivered,
        exchange: String::new(),
        routing_key: "orders".to_string(),
        properties,
        body: MessageBody::Text("{}".to_string()),
    }
}

#[test]
fn test_header_view_includes_user_headers() {
    let message = message_with(
        BasicProperties::new().with_header("region", "eu"),
        false,
    );

    let headers = message.headers();
    assert_eq!(headers.get("region"), Some(&HeaderValue::from("eu")));
}

#[test]
fn test_header_view_includes_standard_headers() {
    let timestamp = Timestamp::from_unix_seconds(1_700_000_000).unwrap();
    let message = message_with(
        BasicProperties::new()
            .with_message_id("msg-1")
            .with_correlation_id("corr-1")
            .with_kind("OrderPlaced")
            .with_priority(9)
            .with_delivery_mode(2)
            .with_timestamp(timestamp),
        true,
    );

    let headers = message.headers();
    assert_eq!(
        headers.get(standard_headers::MESSAGE_ID),
        Some(&HeaderValue::from("msg-1"))
    );
    assert_eq!(
        headers.get(standard_headers::CORRELATION_ID),
        Some(&HeaderValue::from("corr-1"))
    );
    assert_eq!(
        headers.get(standard_headers::TYPE),
        Some(&HeaderValue::from("OrderPlaced"))
    );
    assert_eq!(
        headers.get(standard_headers::PRIORITY),
        Some(&HeaderValue::Int(9))
    );
    assert_eq!(
        headers.get(standard_headers::TIMESTAMP),
        Some(&HeaderValue::Int(1_700_000_000_000))
    );
    assert_eq!(
        headers.get(standard_headers::DELIVERY_MODE),
        Some(&HeaderValue::from("PERSISTENT"))
    );
    assert_eq!(
        headers.get(standard_headers::REDELIVERED),
        Some(&HeaderValue::Bool(true))
    );
}

#[test]
fn test_missing_standard_headers_are_absent() {
    let message = message_with(BasicProperties::new(), false);
    let headers = message.headers();

    assert!(headers.get(standard_headers::MESSAGE_ID).is_none());
    assert!(headers.get(standard_headers::PRIORITY).is_none());
    assert_eq!(
        headers.get(standard_headers::DELIVERY_MODE),
        Some(&HeaderValue::from("NON_PERSISTENT"))
    );
}

#[test]
fn test_single_header_lookup() {
    let message = message_with(
        BasicProperties::new()
            .with_header("region", "eu")
            .with_kind("OrderPlaced"),
        false,
    );

    assert_eq!(message.header("region"), Some(HeaderValue::from("eu")));
    assert_eq!(
        message.header(standard_headers::TYPE),
        Some(HeaderValue::from("OrderPlaced"))
    );
    assert_eq!(message.header("missing"), None);
}

#[test]
fn test_closure_selectors() {
    let selector: SharedSelector = Arc::new(|headers: &Headers| {
        headers.get("region").and_then(HeaderValue::as_str) == Some("eu")
    });

    let eu = message_with(BasicProperties::new().with_header("region", "eu"), false);
    let us = message_with(BasicProperties::new().with_header("region", "us"), false);

    assert!(accepts(Some(&selector), &eu));
    assert!(!accepts(Some(&selector), &us));
    assert!(accepts(None, &us));
}
