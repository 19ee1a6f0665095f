//! Consumer lifecycle state and the wait primitives built on it.
//!
//! # Consumer States
//!
//! - **Active**: deliveries are accepted
//! - **CancelRequested**: the transport was asked to stop; in-flight deliveries
//!   may still arrive
//! - **Cancelled**: terminal, every later delivery is rejected
//!
//! `Active → Cancelled` is allowed directly when the broker cancels without a
//! prior request. Nothing leaves `Cancelled`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

/// Current lifecycle state of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerState {
    Active,
    CancelRequested,
    Cancelled,
}

impl ConsumerState {
    /// Check if deliveries are still accepted
    pub fn accepts_deliveries(&self) -> bool {
        !self.is_cancelled()
    }

    /// Check if the state is terminal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::CancelRequested => "cancel_requested",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Shared state cell.
///
/// Every transition is published through a watch channel so waiters observe
/// it without polling.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConsumerState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConsumerState::Active);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ConsumerState {
        *self.tx.borrow()
    }

    /// `Active → CancelRequested`. Returns false when not active.
    pub(crate) fn request_cancel(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ConsumerState::Active {
                *state = ConsumerState::CancelRequested;
                true
            } else {
                false
            }
        })
    }

    /// Move to `Cancelled`, returning the previous state if it changed.
    pub(crate) fn mark_cancelled(&self) -> Option<ConsumerState> {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if state.is_cancelled() {
                false
            } else {
                previous = Some(*state);
                *state = ConsumerState::Cancelled;
                true
            }
        });
        previous
    }

    /// Wait until cancelled or the timeout elapses. Returns true if cancelled.
    pub(crate) async fn wait_cancelled(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.until_cancelled()).await,
            Ok(true)
        )
    }

    /// Resolves once the state is `Cancelled`
    pub(crate) async fn until_cancelled(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let reached = rx.wait_for(ConsumerState::is_cancelled).await.is_ok();
        reached
    }
}

/// Single-use release signal.
///
/// Released at most once; waiters that arrive after the release return
/// immediately.
#[derive(Debug)]
pub(crate) struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Release the latch. Returns true on the first call only.
    pub(crate) fn release(&self) -> bool {
        self.tx.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        })
    }

    pub(crate) fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait for release or timeout. Returns true if released in time.
    pub(crate) async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        matches!(
            tokio::time::timeout(timeout, async move {
                let released = rx.wait_for(|released| *released).await.is_ok();
                released
            })
            .await,
            Ok(true)
        )
    }
}
