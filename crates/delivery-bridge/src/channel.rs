//! Seams between the consumers and the transport.
//!
//! [`ConsumerChannel`] is the narrow channel capability the consumers issue
//! commands through. [`DeliveryHandler`] is the callback interface the
//! transport drives.

use crate::error::{ConsumerError, TransportError};
use crate::message::{ConsumerTag, Delivery, DeliveryTag, QueueName};
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

/// Channel capability consumed by the delivery bridge.
///
/// Implementations serialize their own commands; the consumers may call them
/// from the transport task and the application task concurrently.
#[async_trait]
pub trait ConsumerChannel: Send + Sync {
    /// Positively acknowledge a delivery
    async fn basic_ack(&self, delivery_tag: DeliveryTag, multiple: bool)
        -> Result<(), TransportError>;

    /// Reject a delivery, optionally asking the broker to requeue it
    async fn basic_nack(&self, delivery_tag: DeliveryTag, requeue: bool)
        -> Result<(), TransportError>;

    /// Ask the broker to stop a consumer.
    ///
    /// Completion is signalled later through
    /// [`DeliveryHandler::handle_cancel_ok`].
    async fn basic_cancel(&self, consumer_tag: &ConsumerTag) -> Result<(), TransportError>;

    /// Register a handler for deliveries from a queue
    async fn basic_consume(
        &self,
        queue: &QueueName,
        consumer_tag: &ConsumerTag,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError>;
}

/// Callbacks the transport invokes for one consumer.
///
/// The transport never invokes these concurrently for the same consumer, and
/// `handle_delivery` must not wait for the application.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// A message was delivered to this consumer
    async fn handle_delivery(
        &self,
        consumer_tag: &ConsumerTag,
        delivery: Delivery,
    ) -> Result<(), ConsumerError>;

    /// The broker confirmed a cancel this client requested
    fn handle_cancel_ok(&self, consumer_tag: &ConsumerTag);

    /// The broker cancelled the consumer on its own, e.g. the queue was deleted
    fn handle_cancel(&self, consumer_tag: &ConsumerTag);
}

/// Channel shared between a consumer and its owning session
pub type SharedChannel = Arc<dyn ConsumerChannel>;
