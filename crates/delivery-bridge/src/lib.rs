//! # Delivery Bridge
//!
//! Consumer-side delivery bridge for a messaging client. The broker pushes
//! deliveries by invoking callbacks on its I/O task; applications want to pull
//! messages with a blocking receive. This library reconciles the two.
//!
//! This library provides:
//! - A receive consumer with a bounded prefetch buffer, selector filtering,
//!   negative-acknowledge-and-requeue backpressure and bounded cancellation
//! - A browsing consumer that collects a bounded number of messages without
//!   consuming them
//! - An in-memory channel for tests and development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all consumer operations
//! - [`message`] - Deliveries, properties and application messages
//! - [`channel`] - Channel and delivery handler traits
//! - [`convert`] - Delivery to message conversion
//! - [`selector`] - Header views and selector predicates
//! - [`receive`] - The receive consumer
//! - [`browse`] - The browsing consumer and scans
//! - [`config`] - Consumer configuration
//! - [`providers`] - Channel implementations
//!
//! ## Usage
//!
//! ```rust
//! use delivery_bridge::{ConsumerConfig, InMemoryChannel, QueueName, ReceiveConsumer};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Arc::new(InMemoryChannel::new());
//! let queue = QueueName::new("orders".to_string())?;
//!
//! let consumer = ReceiveConsumer::standard(channel, queue, ConsumerConfig::default())?
//!     .subscribe()
//!     .await?;
//!
//! if let Some(message) = consumer.receive(Duration::from_millis(200)).await? {
//!     println!("received {:?}", message.body);
//! }
//! consumer.cancel().await?;
//! # Ok(())
//! # }
//! ```

pub mod browse;
pub mod channel;
pub mod config;
pub mod convert;
pub mod error;
pub mod message;
pub mod metrics;
pub mod providers;
pub mod receive;
pub mod selector;
pub mod state;

// Re-export commonly used types at crate root for convenience
pub use browse::{scan_and_wait, BrowsingConsumer, ScanOutcome, ScanRequest, ScanResult};
pub use channel::{ConsumerChannel, DeliveryHandler, SharedChannel};
pub use config::{BridgeConfig, BrowseConfig, ConsumerConfig};
pub use convert::{MessageConverter, SharedConverter, StandardConverter};
pub use error::{
    ConfigurationError, ConsumerError, ConversionError, TransportError, ValidationError,
};
pub use message::{
    BasicProperties, ConsumerMessage, ConsumerTag, Delivery, DeliveryTag, Envelope, HeaderValue,
    Headers, MessageBody, QueueName, Timestamp,
};
pub use metrics::ConsumerMetrics;
pub use providers::{ChannelCommand, InMemoryChannel};
pub use receive::{CancelOutcome, ReceiveConsumer, ReceiveTimeout};
pub use selector::{HeaderView, Selector, SharedSelector};
pub use state::ConsumerState;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
