//! Conversion of raw deliveries into application messages.

use crate::error::ConversionError;
use crate::message::{ConsumerMessage, Delivery, MessageBody};
use serde::de::IgnoredAny;
use std::sync::Arc;

#[cfg(test)]
#[path = "convert_tests.rs"]
mod tests;

/// Default upper bound for message bodies accepted by the standard converter
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Turns a raw delivery into an application message.
///
/// A failed conversion affects that delivery only; the consumer keeps running.
pub trait MessageConverter<M>: Send + Sync {
    fn convert(&self, delivery: &Delivery) -> Result<M, ConversionError>;
}

impl<M, F> MessageConverter<M> for F
where
    F: Fn(&Delivery) -> Result<M, ConversionError> + Send + Sync,
{
    fn convert(&self, delivery: &Delivery) -> Result<M, ConversionError> {
        self(delivery)
    }
}

/// Converter shared between consumers
pub type SharedConverter<M> = Arc<dyn MessageConverter<M>>;

/// Converter producing [`ConsumerMessage`] values.
///
/// Bodies with a `text/*` or JSON content type are decoded as UTF-8 text;
/// JSON bodies must also be well formed. Everything else stays as bytes.
#[derive(Debug, Clone)]
pub struct StandardConverter {
    max_body_size: usize,
}

impl StandardConverter {
    pub fn new() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set the largest body accepted, in bytes
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    fn decode_body(&self, delivery: &Delivery) -> Result<MessageBody, ConversionError> {
        let content_type = delivery
            .properties
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());

        match content_type.as_deref() {
            Some("application/json") => {
                serde_json::from_slice::<IgnoredAny>(&delivery.body)?;
                let text = std::str::from_utf8(&delivery.body)
                    .map_err(|_| ConversionError::InvalidUtf8)?;
                Ok(MessageBody::Text(text.to_string()))
            }
            Some(ct) if ct.starts_with("text/") => {
                let text = std::str::from_utf8(&delivery.body)
                    .map_err(|_| ConversionError::InvalidUtf8)?;
                Ok(MessageBody::Text(text.to_string()))
            }
            _ => Ok(MessageBody::Bytes(delivery.body.clone())),
        }
    }
}

impl Default for StandardConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageConverter<ConsumerMessage> for StandardConverter {
    fn convert(&self, delivery: &Delivery) -> Result<ConsumerMessage, ConversionError> {
        let size = delivery.body.len();
        if size > self.max_body_size {
            return Err(ConversionError::MessageTooLarge {
                size,
                max_size: self.max_body_size,
            });
        }

        if let Some(key) = delivery.properties.headers.keys().find(|k| k.is_empty()) {
            return Err(ConversionError::InvalidHeader {
                key: key.clone(),
                message: "header names must not be empty".to_string(),
            });
        }

        if let Some(encoding) = delivery.properties.content_encoding.as_deref() {
            if !encoding.eq_ignore_ascii_case("identity") && !encoding.is_empty() {
                return Err(ConversionError::Unsupported {
                    message: format!("content encoding '{}'", encoding),
                });
            }
        }

        let body = self.decode_body(delivery)?;

        Ok(ConsumerMessage {
            delivery_tag: delivery.envelope.delivery_tag,
            redelivered: delivery.envelope.redelivered,
            exchange: delivery.envelope.exchange.clone(),
            routing_key: delivery.envelope.routing_key.clone(),
            properties: delivery.properties.clone(),
            body,
        })
    }
}
