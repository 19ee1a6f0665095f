//! In-memory channel implementation for testing and development.
//!
//! This module provides a channel that behaves like a minimal broker:
//! - Messages published to a queue are replayed, in order, to every consumer
//!   registered on that queue
//! - Delivery tags increase monotonically across the channel
//! - Acknowledgements, rejections and cancels are recorded for inspection
//! - Cancels are confirmed asynchronously, unless confirmation is disabled
//! - Callbacks for one consumer never overlap: deliveries and cancel
//!   notifications pass through the same per-consumer dispatch lock
//!
//! Replay does not remove messages, so browsing the same queue twice sees the
//! same messages.

use crate::channel::{ConsumerChannel, DeliveryHandler};
use crate::error::TransportError;
use crate::message::{
    BasicProperties, ConsumerTag, Delivery, DeliveryTag, Envelope, QueueName,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as DispatchLock;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Reply code the broker uses for a duplicate consumer tag
const NOT_ALLOWED: u16 = 530;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in a queue
#[derive(Clone)]
struct StoredMessage {
    properties: BasicProperties,
    body: Bytes,
}

/// A command the channel received, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    Consume {
        queue: QueueName,
        consumer_tag: ConsumerTag,
    },
    Ack {
        delivery_tag: DeliveryTag,
        multiple: bool,
    },
    Nack {
        delivery_tag: DeliveryTag,
        requeue: bool,
    },
    Cancel {
        consumer_tag: ConsumerTag,
    },
}

/// A registered consumer and the lock serializing its callbacks
struct ConsumerSlot {
    handler: Arc<dyn DeliveryHandler>,
    dispatch: DispatchLock<()>,
}

impl ConsumerSlot {
    fn new(handler: Arc<dyn DeliveryHandler>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            dispatch: DispatchLock::new(()),
        })
    }
}

struct ChannelState {
    open: bool,
    confirm_cancels: bool,
    last_delivery_tag: u64,
    queues: HashMap<QueueName, Vec<StoredMessage>>,
    consumers: HashMap<ConsumerTag, Arc<ConsumerSlot>>,
    commands: Vec<ChannelCommand>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            open: true,
            confirm_cancels: true,
            last_delivery_tag: 0,
            queues: HashMap::new(),
            consumers: HashMap::new(),
            commands: Vec::new(),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed)
        }
    }

    fn next_delivery_tag(&mut self) -> DeliveryTag {
        self.last_delivery_tag += 1;
        DeliveryTag::new(self.last_delivery_tag)
    }
}

// ============================================================================
// InMemoryChannel
// ============================================================================

/// In-memory channel implementation
#[derive(Clone)]
pub struct InMemoryChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState::new())),
        }
    }

    /// Never confirm cancels, simulating an unresponsive broker
    pub fn without_cancel_confirmation(self) -> Self {
        self.lock().confirm_cancels = false;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to a queue
    pub fn publish(&self, queue: &QueueName, properties: BasicProperties, body: Bytes) {
        self.lock()
            .queues
            .entry(queue.clone())
            .or_default()
            .push(StoredMessage { properties, body });
    }

    /// Number of messages held by a queue
    pub fn queue_depth(&self, queue: &QueueName) -> usize {
        self.lock().queues.get(queue).map_or(0, Vec::len)
    }

    /// Allocate the next delivery tag without delivering anything
    pub fn next_delivery_tag(&self) -> DeliveryTag {
        self.lock().next_delivery_tag()
    }

    /// All commands received so far
    pub fn commands(&self) -> Vec<ChannelCommand> {
        self.lock().commands.clone()
    }

    /// Delivery tags acknowledged so far
    pub fn acked(&self) -> Vec<DeliveryTag> {
        self.lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                ChannelCommand::Ack { delivery_tag, .. } => Some(*delivery_tag),
                _ => None,
            })
            .collect()
    }

    /// Delivery tags rejected so far, with their requeue flag
    pub fn nacked(&self) -> Vec<(DeliveryTag, bool)> {
        self.lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                ChannelCommand::Nack {
                    delivery_tag,
                    requeue,
                } => Some((*delivery_tag, *requeue)),
                _ => None,
            })
            .collect()
    }

    /// Number of cancel commands received for a consumer
    pub fn cancel_count(&self, consumer_tag: &ConsumerTag) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|command| {
                matches!(command, ChannelCommand::Cancel { consumer_tag: tag } if tag == consumer_tag)
            })
            .count()
    }

    /// Check if a consumer is still registered
    pub fn has_consumer(&self, consumer_tag: &ConsumerTag) -> bool {
        self.lock().consumers.contains_key(consumer_tag)
    }

    /// Cancel a consumer from the broker side, as when its queue is deleted.
    ///
    /// Waits for an in-flight delivery to that consumer to finish first.
    pub async fn broker_cancel(&self, consumer_tag: &ConsumerTag) -> bool {
        let slot = self.lock().consumers.remove(consumer_tag);
        match slot {
            Some(slot) => {
                let _dispatch = slot.dispatch.lock().await;
                debug!(%consumer_tag, "Broker cancelled consumer");
                slot.handler.handle_cancel(consumer_tag);
                true
            }
            None => false,
        }
    }

    /// Close the channel; later commands fail
    pub fn close(&self) {
        let mut state = self.lock();
        state.open = false;
        state.consumers.clear();
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Replay a snapshot of queued messages to one consumer
    async fn replay(
        state: Arc<Mutex<ChannelState>>,
        queue: QueueName,
        consumer_tag: ConsumerTag,
        messages: Vec<StoredMessage>,
    ) {
        for message in messages {
            let next = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if !state.open {
                    None
                } else {
                    match state.consumers.get(&consumer_tag).cloned() {
                        Some(slot) => Some((slot, state.next_delivery_tag())),
                        None => None,
                    }
                }
            };

            let Some((slot, delivery_tag)) = next else {
                debug!(%consumer_tag, "Consumer gone; stopping replay");
                return;
            };

            let delivery = Delivery::new(
                Envelope::new(delivery_tag, "", queue.as_str()),
                message.properties,
                message.body,
            );
            let _dispatch = slot.dispatch.lock().await;
            if let Err(e) = slot.handler.handle_delivery(&consumer_tag, delivery).await {
                warn!(%consumer_tag, %delivery_tag, error = %e, "Consumer failed to handle delivery");
            }
        }
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsumerChannel for InMemoryChannel {
    async fn basic_ack(
        &self,
        delivery_tag: DeliveryTag,
        multiple: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.commands.push(ChannelCommand::Ack {
            delivery_tag,
            multiple,
        });
        Ok(())
    }

    async fn basic_nack(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.commands.push(ChannelCommand::Nack {
            delivery_tag,
            requeue,
        });
        Ok(())
    }

    async fn basic_cancel(&self, consumer_tag: &ConsumerTag) -> Result<(), TransportError> {
        let slot = {
            let mut state = self.lock();
            state.ensure_open()?;
            state.commands.push(ChannelCommand::Cancel {
                consumer_tag: consumer_tag.clone(),
            });
            if state.confirm_cancels {
                state.consumers.remove(consumer_tag)
            } else {
                None
            }
        };

        // Unknown tags are accepted like the broker does; nothing to confirm
        if let Some(slot) = slot {
            let consumer_tag = consumer_tag.clone();
            tokio::spawn(async move {
                let _dispatch = slot.dispatch.lock().await;
                slot.handler.handle_cancel_ok(&consumer_tag);
            });
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &QueueName,
        consumer_tag: &ConsumerTag,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError> {
        let messages = {
            let mut state = self.lock();
            state.ensure_open()?;
            if state.consumers.contains_key(consumer_tag) {
                return Err(TransportError::ProtocolError {
                    code: NOT_ALLOWED,
                    message: format!("attempt to reuse consumer tag '{}'", consumer_tag),
                });
            }
            state.commands.push(ChannelCommand::Consume {
                queue: queue.clone(),
                consumer_tag: consumer_tag.clone(),
            });
            state
                .consumers
                .insert(consumer_tag.clone(), ConsumerSlot::new(handler));
            state.queues.get(queue).cloned().unwrap_or_default()
        };

        debug!(%consumer_tag, %queue, messages = messages.len(), "Consumer registered");
        tokio::spawn(Self::replay(
            Arc::clone(&self.state),
            queue.clone(),
            consumer_tag.clone(),
            messages,
        ));
        Ok(())
    }
}
