//! Receive consumer bridging broker-pushed deliveries to a blocking receive.
//!
//! The transport pushes deliveries through [`DeliveryHandler::handle_delivery`]
//! while a single application task pulls them with
//! [`ReceiveConsumer::receive`]. The two sides meet in a bounded buffer:
//!
//! - the transport side never waits; a full buffer rejects the delivery with a
//!   requeue so the broker redelivers it later
//! - the application side waits with a caller-supplied timeout
//!
//! A delivery is acknowledged only after it is safely buffered, so nothing
//! acknowledged to the broker can be lost by the bridge.

use crate::channel::{DeliveryHandler, SharedChannel};
use crate::config::ConsumerConfig;
use crate::convert::{SharedConverter, StandardConverter};
use crate::error::{ConsumerError, TransportError};
use crate::message::{ConsumerMessage, ConsumerTag, Delivery, DeliveryTag, QueueName};
use crate::metrics::{ConsumerMetrics, MetricsRecorder};
use crate::selector::{self, HeaderView, SharedSelector};
use crate::state::{ConsumerState, StateCell};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "receive_tests.rs"]
mod tests;

// ============================================================================
// Receive Timeout
// ============================================================================

/// How long [`ReceiveConsumer::receive`] waits for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveTimeout {
    /// Return immediately with whatever is buffered
    NoWait,
    /// Wait at most this long
    After(Duration),
    /// Wait until a message arrives or the consumer is cancelled
    Never,
}

impl ReceiveTimeout {
    /// Interpret a millisecond timeout: zero polls, negative waits indefinitely.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => Self::NoWait,
            m if m < 0 => Self::Never,
            m => Self::After(Duration::from_millis(m as u64)),
        }
    }
}

impl From<Duration> for ReceiveTimeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::NoWait
        } else {
            Self::After(duration)
        }
    }
}

/// How a call to [`ReceiveConsumer::cancel`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The broker confirmed the cancel
    Confirmed,
    /// No confirmation arrived in time; the consumer is cancelled locally
    TimedOut,
    /// An earlier call already cancelled the consumer
    AlreadyCancelled,
}

// ============================================================================
// Receive Consumer
// ============================================================================

/// Delivery bridge for synchronous receive.
///
/// Created per subscription. Register it with [`ReceiveConsumer::subscribe`]
/// or hand it to a transport as a [`DeliveryHandler`] directly.
pub struct ReceiveConsumer<M> {
    channel: SharedChannel,
    queue: QueueName,
    consumer_tag: ConsumerTag,
    converter: SharedConverter<M>,
    selector: Option<SharedSelector>,
    config: ConsumerConfig,
    buffer_tx: mpsc::Sender<M>,
    buffer_rx: Mutex<mpsc::Receiver<M>>,
    state: StateCell,
    cancel_issued: AtomicBool,
    metrics: MetricsRecorder,
}

impl<M> ReceiveConsumer<M>
where
    M: HeaderView + Send + 'static,
{
    /// Create a consumer with a generated consumer tag.
    ///
    /// Fails if the configuration is invalid.
    pub fn new(
        channel: SharedChannel,
        queue: QueueName,
        converter: SharedConverter<M>,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerError> {
        config.validate()?;
        let (buffer_tx, buffer_rx) = mpsc::channel(config.batching_size);

        Ok(Self {
            channel,
            queue,
            consumer_tag: ConsumerTag::generate(),
            converter,
            selector: None,
            config,
            buffer_tx,
            buffer_rx: Mutex::new(buffer_rx),
            state: StateCell::new(),
            cancel_issued: AtomicBool::new(false),
            metrics: MetricsRecorder::default(),
        })
    }

    /// Filter deliveries with a selector
    pub fn with_selector(mut self, selector: SharedSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Use an explicit consumer tag instead of a generated one
    pub fn with_consumer_tag(mut self, consumer_tag: ConsumerTag) -> Self {
        self.consumer_tag = consumer_tag;
        self
    }

    /// Register the consumer with its channel and start receiving deliveries
    pub async fn subscribe(self) -> Result<Arc<Self>, ConsumerError> {
        let consumer = Arc::new(self);
        let handler: Arc<dyn DeliveryHandler> = consumer.clone();

        consumer
            .channel
            .basic_consume(&consumer.queue, &consumer.consumer_tag, handler)
            .await
            .map_err(|e| consumer.transport_failure("consume", e))?;

        info!(
            consumer_tag = %consumer.consumer_tag,
            queue = %consumer.queue,
            batching_size = consumer.config.batching_size,
            "Receive consumer subscribed"
        );
        Ok(consumer)
    }

    /// Take the next buffered message, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time, or when the consumer
    /// is cancelled and its buffer is drained. Meant for one consuming task at
    /// a time; concurrent callers queue up behind each other.
    pub async fn receive(
        &self,
        timeout: impl Into<ReceiveTimeout>,
    ) -> Result<Option<M>, ConsumerError> {
        let mut buffer = self.buffer_rx.lock().await;

        let message = match timeout.into() {
            ReceiveTimeout::NoWait => buffer.try_recv().ok(),
            ReceiveTimeout::After(duration) => {
                tokio::time::timeout(duration, self.next_message(&mut buffer))
                    .await
                    .unwrap_or(None)
            }
            ReceiveTimeout::Never => self.next_message(&mut buffer).await,
        };

        if message.is_some() {
            self.metrics.record_received();
        }
        Ok(message)
    }

    /// Next buffered message, or `None` once cancelled with nothing buffered
    async fn next_message(&self, buffer: &mut mpsc::Receiver<M>) -> Option<M> {
        tokio::select! {
            biased;
            message = buffer.recv() => message,
            _ = self.state.until_cancelled() => buffer.try_recv().ok(),
        }
    }

    /// Cancel the consumer and wait for the broker to confirm.
    ///
    /// The cancel command is sent at most once. If no confirmation arrives
    /// within the configured timeout the consumer is treated as cancelled
    /// locally. Buffered messages stay available to [`Self::receive`].
    pub async fn cancel(&self) -> Result<CancelOutcome, ConsumerError> {
        let timeout = self.config.cancel_timeout();

        if self.cancel_issued.swap(true, Ordering::AcqRel) {
            if self.state.get().is_cancelled() {
                debug!(consumer_tag = %self.consumer_tag, "Consumer already cancelled");
                return Ok(CancelOutcome::AlreadyCancelled);
            }
            // Another caller is still waiting for the confirmation
            return Ok(self.await_cancel_confirmation(timeout).await);
        }

        self.state.request_cancel();
        info!(
            consumer_tag = %self.consumer_tag,
            state = %self.state.get(),
            "Cancelling receive consumer"
        );

        self.channel
            .basic_cancel(&self.consumer_tag)
            .await
            .map_err(|e| self.transport_failure("cancel", e))?;

        Ok(self.await_cancel_confirmation(timeout).await)
    }

    async fn await_cancel_confirmation(&self, timeout: Duration) -> CancelOutcome {
        if self.state.wait_cancelled(timeout).await {
            return CancelOutcome::Confirmed;
        }

        warn!(
            consumer_tag = %self.consumer_tag,
            timeout_ms = timeout.as_millis() as u64,
            "Cancel not confirmed in time; assuming consumer is cancelled"
        );
        self.state.mark_cancelled();
        CancelOutcome::TimedOut
    }

    pub fn consumer_tag(&self) -> &ConsumerTag {
        &self.consumer_tag
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn state(&self) -> ConsumerState {
        self.state.get()
    }

    /// Number of messages waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.buffer_tx.max_capacity() - self.buffer_tx.capacity()
    }

    /// Capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.buffer_tx.max_capacity()
    }

    pub fn metrics(&self) -> ConsumerMetrics {
        self.metrics.snapshot(self.state.get(), self.buffered())
    }

    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), ConsumerError> {
        self.channel
            .basic_ack(delivery_tag, false)
            .await
            .map_err(|e| self.transport_failure("ack", e))
    }

    async fn nack(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), ConsumerError> {
        self.channel
            .basic_nack(delivery_tag, requeue)
            .await
            .map_err(|e| self.transport_failure("nack", e))
    }

    /// A failed channel command leaves the consumer unusable
    fn transport_failure(&self, operation: &str, error: TransportError) -> ConsumerError {
        error!(
            consumer_tag = %self.consumer_tag,
            operation,
            error = %error,
            "Channel command failed; consumer is no longer usable"
        );
        self.state.mark_cancelled();
        ConsumerError::Transport(error)
    }
}

impl ReceiveConsumer<ConsumerMessage> {
    /// Create a consumer producing [`ConsumerMessage`] values with the standard converter
    pub fn standard(
        channel: SharedChannel,
        queue: QueueName,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerError> {
        Self::new(channel, queue, Arc::new(StandardConverter::new()), config)
    }
}

#[async_trait]
impl<M> DeliveryHandler for ReceiveConsumer<M>
where
    M: HeaderView + Send + 'static,
{
    async fn handle_delivery(
        &self,
        consumer_tag: &ConsumerTag,
        delivery: Delivery,
    ) -> Result<(), ConsumerError> {
        let delivery_tag = delivery.delivery_tag();
        self.metrics.record_delivered();

        if self.state.get().is_cancelled() {
            debug!(
                %consumer_tag,
                %delivery_tag,
                "Rejecting delivery to cancelled consumer"
            );
            self.metrics.record_rejected_after_cancel();
            return self
                .nack(delivery_tag, self.config.requeue_after_cancel)
                .await;
        }

        let message = match self.converter.convert(&delivery) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    %consumer_tag,
                    %delivery_tag,
                    error = %e,
                    "Failed to convert delivery"
                );
                self.metrics.record_conversion_failure();
                return Err(ConsumerError::Conversion(e));
            }
        };

        if !selector::accepts(self.selector.as_ref(), &message) {
            debug!(%consumer_tag, %delivery_tag, "Delivery filtered out by selector");
            self.metrics.record_filtered();
            return self.ack(delivery_tag).await;
        }

        match self.buffer_tx.try_send(message) {
            Ok(()) => {
                debug!(%consumer_tag, %delivery_tag, "Delivery buffered");
                self.metrics.record_accepted();
                self.ack(delivery_tag).await
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    %consumer_tag,
                    %delivery_tag,
                    capacity = self.capacity(),
                    "Buffer full; rejecting delivery"
                );
                self.metrics.record_overflow();
                self.nack(delivery_tag, self.config.requeue_on_overflow)
                    .await
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // The receiving half lives as long as the consumer
                self.metrics.record_rejected_after_cancel();
                self.nack(delivery_tag, true).await
            }
        }
    }

    fn handle_cancel_ok(&self, consumer_tag: &ConsumerTag) {
        if let Some(previous) = self.state.mark_cancelled() {
            info!(%consumer_tag, %previous, "Receive consumer cancelled");
        }
    }

    fn handle_cancel(&self, consumer_tag: &ConsumerTag) {
        if let Some(previous) = self.state.mark_cancelled() {
            warn!(%consumer_tag, %previous, "Receive consumer cancelled by broker");
        }
    }
}
