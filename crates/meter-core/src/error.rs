//! Error types for the meter system
//!
//! This module defines all error types used throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for meter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the meter system
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (bad role identifier, missing or malformed option)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No source registered under the requested name
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// `--help` was requested; carries the rendered usage text
    #[error("{0}")]
    HelpRequested(String),

    /// Credential issuance failed
    #[error("Credential error: {0}")]
    Credential(String),

    /// Device shadow read or write failed
    #[error("Shadow error: {0}")]
    Shadow(String),

    /// A source failed while computing its patch
    #[error("Source error ({source_name}): {message}")]
    Source {
        /// Source name
        source_name: String,
        /// Error message
        message: String,
    },

    /// A network call exceeded the configured call timeout
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out
        operation: &'static str,
        /// The timeout that elapsed
        after: Duration,
    },

    /// Persisted option store errors
    #[error("Option store error: {0}")]
    OptionStore(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a shadow transport error
    pub fn shadow(msg: impl Into<String>) -> Self {
        Self::Shadow(msg.into())
    }

    /// Create an option store error
    pub fn option_store(msg: impl Into<String>) -> Self {
        Self::OptionStore(msg.into())
    }

    /// Create a source-specific error
    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Whether this error belongs to the configuration class.
    ///
    /// Configuration errors are raised before any device I/O and are never
    /// subject to the cycle failure policy.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownSource(_) | Self::HelpRequested(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
