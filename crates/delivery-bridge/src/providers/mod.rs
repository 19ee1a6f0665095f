//! Channel implementations.
//!
//! This module contains concrete implementations of the `ConsumerChannel`
//! trait.

pub mod memory;

pub use memory::{ChannelCommand, InMemoryChannel};
