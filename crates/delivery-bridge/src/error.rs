//! Error types for consumer operations.

use thiserror::Error;

/// Comprehensive error type for consumer operations
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Message conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl ConsumerError {
    /// Check if the consumer can keep consuming after this error
    ///
    /// Conversion failures affect a single delivery only. Everything else
    /// leaves the consumer unusable.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conversion(_) => true,
            Self::Transport(_) => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if the owning channel must be closed and recovered
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Failures reported by the channel collaborator.
///
/// These are never retried by the consumers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Protocol error: {code} - {message}")]
    ProtocolError { code: u16, message: String },
}

/// Errors raised while turning a raw delivery into an application message
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("JSON body is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Header '{key}' is invalid: {message}")]
    InvalidHeader { key: String, message: String },

    #[error("Message exceeds size limit: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Unsupported message: {message}")]
    Unsupported { message: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
