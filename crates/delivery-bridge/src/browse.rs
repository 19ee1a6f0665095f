//! Browsing consumer collecting a bounded number of messages.
//!
//! Browsing is non-destructive: collected deliveries are never acknowledged or
//! rejected, so the broker keeps its copies and returns them to the queue when
//! the owning channel is closed.

use crate::channel::{DeliveryHandler, SharedChannel};
use crate::config::BrowseConfig;
use crate::convert::SharedConverter;
use crate::error::{ConsumerError, TransportError};
use crate::message::{ConsumerTag, Delivery, QueueName};
use crate::metrics::{ConsumerMetrics, MetricsRecorder};
use crate::selector::{self, HeaderView, SharedSelector};
use crate::state::{ConsumerState, Latch, StateCell};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "browse_tests.rs"]
mod tests;

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The expected number of messages was collected
    Exhausted,
    /// The consumer was cancelled before the expected count was reached
    Cancelled,
    /// Neither happened before the timeout
    TimedOut,
}

impl ScanOutcome {
    /// Check if the wait ended before the timeout
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Cancelled)
    }

    /// Check if the expected count was met
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

/// Collected messages of a scan
#[derive(Debug)]
pub struct ScanResult<M> {
    pub messages: Vec<M>,
    pub outcome: ScanOutcome,
}

/// Parameters of one scan
#[derive(Clone)]
pub struct ScanRequest {
    pub expected_count: usize,
    pub selector: Option<SharedSelector>,
    pub timeout: Duration,
}

impl ScanRequest {
    pub fn new(expected_count: usize) -> Self {
        Self::from_config(expected_count, &BrowseConfig::default())
    }

    /// Build a request with the configured cap and timeout
    pub fn from_config(expected_count: usize, config: &BrowseConfig) -> Self {
        Self {
            expected_count: config.cap(expected_count),
            selector: None,
            timeout: config.timeout(),
        }
    }

    pub fn with_selector(mut self, selector: SharedSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Browsing Consumer
// ============================================================================

/// Bulk scan collector.
///
/// Accepts deliveries until its budget is spent, then cancels itself.
pub struct BrowsingConsumer<M> {
    channel: SharedChannel,
    consumer_tag: ConsumerTag,
    converter: SharedConverter<M>,
    selector: Option<SharedSelector>,
    expected: usize,
    inner: Mutex<Collected<M>>,
    state: StateCell,
    latch: Latch,
    cancel_issued: AtomicBool,
    metrics: MetricsRecorder,
}

struct Collected<M> {
    remaining: usize,
    messages: Vec<M>,
}

impl<M> BrowsingConsumer<M>
where
    M: HeaderView + Send + 'static,
{
    pub fn new(
        channel: SharedChannel,
        converter: SharedConverter<M>,
        expected_count: usize,
        selector: Option<SharedSelector>,
    ) -> Self {
        let latch = Latch::new();
        if expected_count == 0 {
            latch.release();
        }

        Self {
            channel,
            consumer_tag: ConsumerTag::generate(),
            converter,
            selector,
            expected: expected_count,
            inner: Mutex::new(Collected {
                remaining: expected_count,
                messages: Vec::with_capacity(expected_count.min(1024)),
            }),
            state: StateCell::new(),
            latch,
            cancel_issued: AtomicBool::new(false),
            metrics: MetricsRecorder::default(),
        }
    }

    pub fn with_consumer_tag(mut self, consumer_tag: ConsumerTag) -> Self {
        self.consumer_tag = consumer_tag;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Collected<M>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the budget is spent, the consumer is cancelled, or the timeout elapses
    pub async fn await_completion(&self, timeout: Duration) -> ScanOutcome {
        if !self.latch.wait(timeout).await {
            return ScanOutcome::TimedOut;
        }
        if self.remaining() == 0 {
            ScanOutcome::Exhausted
        } else {
            ScanOutcome::Cancelled
        }
    }

    /// Check if the scan has stopped waiting for deliveries
    pub fn is_done(&self) -> bool {
        self.latch.is_released()
    }

    /// Messages still needed to complete the scan
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of messages collected so far
    pub fn collected(&self) -> usize {
        self.lock().messages.len()
    }

    /// Take the collected messages, in delivery order
    pub fn take_messages(&self) -> Vec<M> {
        std::mem::take(&mut self.lock().messages)
    }

    pub fn consumer_tag(&self) -> &ConsumerTag {
        &self.consumer_tag
    }

    pub fn state(&self) -> ConsumerState {
        self.state.get()
    }

    pub fn metrics(&self) -> ConsumerMetrics {
        self.metrics.snapshot(self.state.get(), self.collected())
    }

    /// Ask the broker to stop this consumer. Sent at most once.
    pub async fn cancel(&self) -> Result<(), ConsumerError> {
        if self.cancel_issued.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.state.request_cancel();

        if let Err(e) = self.channel.basic_cancel(&self.consumer_tag).await {
            return Err(self.transport_failure(e));
        }
        Ok(())
    }

    fn transport_failure(&self, error: TransportError) -> ConsumerError {
        error!(
            consumer_tag = %self.consumer_tag,
            error = %error,
            "Failed to cancel browsing consumer"
        );
        self.state.mark_cancelled();
        self.latch.release();
        ConsumerError::Transport(error)
    }
}

#[async_trait]
impl<M> DeliveryHandler for BrowsingConsumer<M>
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

        // Cancelled or exhausted scans ignore the rest; the broker still holds its copies
        if self.state.get().is_cancelled() {
            debug!(%consumer_tag, %delivery_tag, "Ignoring delivery to cancelled browsing consumer");
            self.metrics.record_rejected_after_cancel();
            return Ok(());
        }
        if self.remaining() == 0 {
            return Ok(());
        }

        let message = match self.converter.convert(&delivery) {
            Ok(message) => message,
            Err(e) => {
                warn!(%consumer_tag, %delivery_tag, error = %e, "Failed to convert browsed delivery");
                self.metrics.record_conversion_failure();
                return Err(ConsumerError::Conversion(e));
            }
        };

        if !selector::accepts(self.selector.as_ref(), &message) {
            debug!(%consumer_tag, %delivery_tag, "Browsed delivery filtered out by selector");
            self.metrics.record_filtered();
            return Ok(());
        }

        let remaining = {
            let mut collected = self.lock();
            collected.messages.push(message);
            collected.remaining -= 1;
            collected.remaining
        };
        self.metrics.record_accepted();

        if remaining == 0 {
            debug!(%consumer_tag, expected = self.expected, "Browse budget exhausted");
            self.latch.release();
            self.cancel().await?;
        }
        Ok(())
    }

    fn handle_cancel_ok(&self, consumer_tag: &ConsumerTag) {
        self.state.mark_cancelled();
        if self.latch.release() {
            debug!(%consumer_tag, collected = self.collected(), "Browsing consumer cancelled");
        }
    }

    fn handle_cancel(&self, consumer_tag: &ConsumerTag) {
        self.state.mark_cancelled();
        if self.latch.release() {
            warn!(
                %consumer_tag,
                collected = self.collected(),
                "Browsing consumer cancelled by broker"
            );
        }
    }
}

// ============================================================================
// Scan
// ============================================================================

/// Browse up to `request.expected_count` messages from a queue.
///
/// Subscribes a [`BrowsingConsumer`], waits for it to finish, and returns
/// whatever was collected. Partial results on timeout or broker cancel are
/// returned as-is, with the outcome saying why.
///
/// # Examples
///
/// ```rust
/// use delivery_bridge::{
///     scan_and_wait, BasicProperties, ConsumerMessage, InMemoryChannel, QueueName,
///     ScanOutcome, ScanRequest, SharedConverter, StandardConverter,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let channel = Arc::new(InMemoryChannel::new());
/// let queue = QueueName::new("orders".to_string()).unwrap();
/// channel.publish(&queue, BasicProperties::new(), "order-1".into());
///
/// let converter: SharedConverter<ConsumerMessage> = Arc::new(StandardConverter::new());
/// let request = ScanRequest::new(1).with_timeout(Duration::from_secs(1));
/// let result = scan_and_wait(channel, &queue, converter, request).await.unwrap();
///
/// assert_eq!(result.outcome, ScanOutcome::Exhausted);
/// assert_eq!(result.messages.len(), 1);
/// # });
/// ```
pub async fn scan_and_wait<M>(
    channel: SharedChannel,
    queue: &QueueName,
    converter: SharedConverter<M>,
    request: ScanRequest,
) -> Result<ScanResult<M>, ConsumerError>
where
    M: HeaderView + Send + 'static,
{
    if request.expected_count == 0 {
        return Ok(ScanResult {
            messages: Vec::new(),
            outcome: ScanOutcome::Exhausted,
        });
    }

    let consumer = Arc::new(BrowsingConsumer::new(
        Arc::clone(&channel),
        converter,
        request.expected_count,
        request.selector,
    ));
    let handler: Arc<dyn DeliveryHandler> = consumer.clone();

    channel
        .basic_consume(queue, consumer.consumer_tag(), handler)
        .await?;
    debug!(
        consumer_tag = %consumer.consumer_tag(),
        %queue,
        expected = request.expected_count,
        "Browse scan started"
    );

    let outcome = consumer.await_completion(request.timeout).await;
    if outcome == ScanOutcome::TimedOut {
        warn!(
            consumer_tag = %consumer.consumer_tag(),
            %queue,
            collected = consumer.collected(),
            timeout_ms = request.timeout.as_millis() as u64,
            "Browse scan timed out; returning partial results"
        );
        if let Err(e) = consumer.cancel().await {
            warn!(error = %e, "Failed to cancel timed out browse consumer");
        }
    }

    let messages = consumer.take_messages();
    info!(
        %queue,
        collected = messages.len(),
        outcome = ?outcome,
        "Browse scan finished"
    );
    Ok(ScanResult { messages, outcome })
}
