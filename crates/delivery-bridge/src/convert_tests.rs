//! Tests for the standard message converter.

use super::*;
use crate::message::{BasicProperties, DeliveryTag, Envelope, HeaderValue};
use bytes::Bytes;

fn delivery(properties: BasicProperties, body: &'static [u8]) -> Delivery {
    Delivery::new(
        Envelope::new(DeliveryTag::new(3), "amq.direct", "orders"),
        properties,
        Bytes::from_static(body),
    )
}

#[test]
fn test_text_body_is_decoded() {
    let converter = StandardConverter::new();
    let message = converter
        .convert(&delivery(
            BasicProperties::new().with_content_type("text/plain; charset=utf-8"),
            b"hello",
        ))
        .unwrap();

    assert_eq!(message.body, MessageBody::Text("hello".to_string()));
    assert_eq!(message.delivery_tag, DeliveryTag::new(3));
    assert_eq!(message.exchange, "amq.direct");
    assert_eq!(message.routing_key, "orders");
}

#[test]
fn test_binary_body_is_kept_as_bytes() {
    let converter = StandardConverter::new();
    let message = converter
        .convert(&delivery(BasicProperties::new(), &[0xff, 0x00]))
        .unwrap();

    assert_eq!(
        message.body,
        MessageBody::Bytes(Bytes::from_static(&[0xff, 0x00]))
    );
}

#[test]
fn test_invalid_utf8_text_fails() {
    let converter = StandardConverter::new();
    let result = converter.convert(&delivery(
        BasicProperties::new().with_content_type("text/plain"),
        &[0xff, 0xfe],
    ));

    assert!(matches!(result, Err(ConversionError::InvalidUtf8)));
}

#[test]
fn test_malformed_json_fails() {
    let converter = StandardConverter::new();

    let ok = converter.convert(&delivery(
        BasicProperties::new().with_content_type("application/json"),
        br#"{"id": 1}"#,
    ));
    assert!(ok.is_ok());

    let bad = converter.convert(&delivery(
        BasicProperties::new().with_content_type("application/json"),
        b"{not json",
    ));
    assert!(matches!(bad, Err(ConversionError::Json(_))));
}

#[test]
fn test_oversized_body_fails() {
    let converter = StandardConverter::new().with_max_body_size(4);
    let result = converter.convert(&delivery(BasicProperties::new(), b"too large"));

    match result {
        Err(ConversionError::MessageTooLarge { size, max_size }) => {
            assert_eq!(size, 9);
            assert_eq!(max_size, 4);
        }
        other => panic!("Expected MessageTooLarge, got: {:?}", other),
    }
}

#[test]
fn test_empty_header_name_fails() {
    let converter = StandardConverter::new();
    let mut properties = BasicProperties::new();
    properties
        .headers
        .insert(String::new(), HeaderValue::from("value"));

    let result = converter.convert(&delivery(properties, b"x"));
    assert!(matches!(result, Err(ConversionError::InvalidHeader { .. })));
}

#[test]
fn test_compressed_content_is_unsupported() {
    let converter = StandardConverter::new();
    let mut properties = BasicProperties::new();
    properties.content_encoding = Some("gzip".to_string());

    let result = converter.convert(&delivery(properties, b"x"));
    assert!(matches!(result, Err(ConversionError::Unsupported { .. })));
}

#[test]
fn test_closures_are_converters() {
    let converter = |delivery: &Delivery| -> Result<u64, ConversionError> {
        Ok(delivery.delivery_tag().value())
    };

    assert_eq!(
        converter
            .convert(&delivery(BasicProperties::new(), b""))
            .unwrap(),
        3
    );
}
