//! Per-consumer delivery counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::ConsumerState;

/// Snapshot of a consumer's delivery statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerMetrics {
    /// Current lifecycle state
    pub state: ConsumerState,

    /// Deliveries handed to the consumer by the transport
    pub delivered: u64,

    /// Deliveries accepted into the buffer or the scan results
    pub accepted: u64,

    /// Deliveries dropped by the selector
    pub filtered: u64,

    /// Deliveries rejected because the buffer was full
    pub overflowed: u64,

    /// Deliveries rejected because the consumer was cancelled
    pub rejected_after_cancel: u64,

    /// Deliveries that could not be converted
    pub conversion_failures: u64,

    /// Messages handed to the application
    pub received: u64,

    /// Messages waiting in the buffer
    pub buffered: usize,
}

/// Lock-free counters updated from both the transport and the consuming task.
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    delivered: AtomicU64,
    accepted: AtomicU64,
    filtered: AtomicU64,
    overflowed: AtomicU64,
    rejected_after_cancel: AtomicU64,
    conversion_failures: AtomicU64,
    received: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_after_cancel(&self) {
        self.rejected_after_cancel.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conversion_failure(&self) {
        self.conversion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, state: ConsumerState, buffered: usize) -> ConsumerMetrics {
        ConsumerMetrics {
            state,
            delivered: self.delivered.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            rejected_after_cancel: self.rejected_after_cancel.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            buffered,
        }
    }
}
