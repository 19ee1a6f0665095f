//! Header views and message selectors.
//!
//! Selector expressions are parsed and evaluated elsewhere. This module only
//! defines the seam: messages expose their headers through [`HeaderView`] and
//! a compiled selector is consumed as an opaque [`Selector`] predicate.
//!
//! # Example
//!
//! ```rust
//! use delivery_bridge::selector::{HeaderView, Selector};
//! use delivery_bridge::{HeaderValue, Headers};
//!
//! struct Order {
//!     region: String,
//! }
//!
//! impl HeaderView for Order {
//!     fn headers(&self) -> Headers {
//!         let mut headers = Headers::new();
//!         headers.insert("region".to_string(), HeaderValue::from(self.region.as_str()));
//!         headers
//!     }
//! }
//!
//! let only_eu = |headers: &Headers| headers.get("region") == Some(&HeaderValue::from("eu"));
//! let order = Order { region: "eu".to_string() };
//! assert!(only_eu.evaluate(&order.headers()));
//! ```

use crate::message::{ConsumerMessage, HeaderValue, Headers};
use std::sync::Arc;

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;

/// Standard header names exposed to selectors alongside user headers
pub mod standard_headers {
    pub const MESSAGE_ID: &str = "JMSMessageID";
    pub const CORRELATION_ID: &str = "JMSCorrelationID";
    pub const TYPE: &str = "JMSType";
    pub const PRIORITY: &str = "JMSPriority";
    pub const TIMESTAMP: &str = "JMSTimestamp";
    pub const DELIVERY_MODE: &str = "JMSDeliveryMode";
    pub const REDELIVERED: &str = "JMSRedelivered";
}

/// Trait for messages that expose a header view to selectors.
pub trait HeaderView {
    /// All headers visible to a selector.
    fn headers(&self) -> Headers;

    /// Get a single header value by name.
    ///
    /// Default implementation builds the full view; override when a direct
    /// lookup is cheaper.
    fn header(&self, name: &str) -> Option<HeaderValue> {
        self.headers().remove(name)
    }
}

impl HeaderView for ConsumerMessage {
    fn headers(&self) -> Headers {
        let mut headers = self.properties.headers.clone();
        let properties = &self.properties;

        if let Some(message_id) = &properties.message_id {
            headers.insert(
                standard_headers::MESSAGE_ID.to_string(),
                HeaderValue::from(message_id.as_str()),
            );
        }
        if let Some(correlation_id) = &properties.correlation_id {
            headers.insert(
                standard_headers::CORRELATION_ID.to_string(),
                HeaderValue::from(correlation_id.as_str()),
            );
        }
        if let Some(kind) = &properties.kind {
            headers.insert(
                standard_headers::TYPE.to_string(),
                HeaderValue::from(kind.as_str()),
            );
        }
        if let Some(priority) = properties.priority {
            headers.insert(
                standard_headers::PRIORITY.to_string(),
                HeaderValue::Int(i64::from(priority)),
            );
        }
        if let Some(timestamp) = properties.timestamp {
            headers.insert(
                standard_headers::TIMESTAMP.to_string(),
                HeaderValue::Int(timestamp.unix_millis()),
            );
        }
        // Non-persistent unless the producer said otherwise
        let delivery_mode = match properties.delivery_mode {
            Some(2) => "PERSISTENT",
            _ => "NON_PERSISTENT",
        };
        headers.insert(
            standard_headers::DELIVERY_MODE.to_string(),
            HeaderValue::from(delivery_mode),
        );
        headers.insert(
            standard_headers::REDELIVERED.to_string(),
            HeaderValue::Bool(self.redelivered),
        );

        headers
    }

    fn header(&self, name: &str) -> Option<HeaderValue> {
        match self.properties.headers.get(name) {
            Some(value) => Some(value.clone()),
            None => self.headers().remove(name),
        }
    }
}

/// A compiled message selector.
///
/// Implementations must be pure: the same headers always give the same answer.
pub trait Selector: Send + Sync {
    /// Decide whether a message with these headers is surfaced to the application
    fn evaluate(&self, headers: &Headers) -> bool;
}

impl<F> Selector for F
where
    F: Fn(&Headers) -> bool + Send + Sync,
{
    fn evaluate(&self, headers: &Headers) -> bool {
        self(headers)
    }
}

/// Selector shared between a consumer and its owner
pub type SharedSelector = Arc<dyn Selector>;

/// Evaluate an optional selector against a message; no selector accepts everything
pub(crate) fn accepts<M: HeaderView>(selector: Option<&SharedSelector>, message: &M) -> bool {
    match selector {
        Some(selector) => selector.evaluate(&message.headers()),
        None => true,
    }
}
