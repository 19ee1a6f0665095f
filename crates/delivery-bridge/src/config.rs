//! Consumer configuration.
//!
//! Sources (applied in order, later sources override earlier ones):
//!  1. Built-in defaults on every field
//!  2. An optional file (YAML, TOML or JSON, chosen by extension)
//!  3. Environment variables prefixed `BRIDGE__` with a double-underscore
//!     separator, e.g. `BRIDGE__CONSUMER__BATCHING_SIZE=10`

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "BRIDGE";

/// Configuration for the receive consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Capacity of the prefetch buffer
    pub batching_size: usize,
    /// How long `cancel` waits for the broker to confirm
    pub cancel_timeout_ms: u64,
    /// Requeue deliveries rejected because the buffer is full
    pub requeue_on_overflow: bool,
    /// Requeue deliveries arriving after cancellation
    pub requeue_after_cancel: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batching_size: 5,
            cancel_timeout_ms: 1000,
            requeue_on_overflow: true,
            requeue_after_cancel: true,
        }
    }
}

impl ConsumerConfig {
    pub fn with_batching_size(mut self, batching_size: usize) -> Self {
        self.batching_size = batching_size;
        self
    }

    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.batching_size == 0 {
            return Err(ConfigurationError::Invalid {
                message: "consumer.batching_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for browse scans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseConfig {
    /// How long a scan waits for its messages
    pub timeout_ms: u64,
    /// Upper bound on the messages one scan collects; 0 means unlimited
    pub max_messages: usize,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            max_messages: 0,
        }
    }
}

impl BrowseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply the configured cap to a requested message count
    pub fn cap(&self, expected_count: usize) -> usize {
        if self.max_messages == 0 {
            expected_count
        } else {
            expected_count.min(self.max_messages)
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub consumer: ConsumerConfig,
    pub browse: BrowseConfig,
}

impl BridgeConfig {
    /// Load configuration from an optional file plus the environment.
    ///
    /// A missing explicit file is an error; absent values fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            tracing::info!(path = %path.display(), "Loading consumer configuration");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: BridgeConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.consumer.validate()
    }
}
