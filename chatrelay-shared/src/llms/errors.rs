//! # LLM Error Types
//!
//! This module defines error types for provider operations.

use thiserror::Error;

/// Result type alias for LLM operations
pub type LLMResult<T> = Result<T, LLMError>;

/// Error type shared by every provider adapter
#[derive(Error, Debug)]
pub enum LLMError {
    /// The provider could not be reached
    #[error("Provider transport failed: {message}")]
    Transport { message: String },

    /// The provider answered with a non-success status
    #[error("Provider returned status {status}: {message}")]
    Provider { status: u16, message: String },

    /// The provider answered with a body that cannot be normalized
    #[error("Invalid provider response: {details}")]
    InvalidResponse { details: String },

    /// The token stream failed after it was opened
    #[error("Stream failed: {reason}")]
    Stream { reason: String },

    /// No adapter is registered under the requested name
    #[error("Unknown provider: {name}")]
    UnknownProvider { name: String },

    /// Invalid configuration
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfiguration { field: String, message: String },
}

impl LLMError {
    /// Create a new transport error
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new invalid response error
    pub fn invalid_response<T: Into<String>>(details: T) -> Self {
        Self::InvalidResponse {
            details: details.into(),
        }
    }

    /// Create a new mid-stream failure
    pub fn stream<T: Into<String>>(reason: T) -> Self {
        Self::Stream {
            reason: reason.into(),
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable label used in logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Provider { .. } => "provider",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Stream { .. } => "stream",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::InvalidConfiguration { .. } => "invalid_configuration",
        }
    }
}

impl From<reqwest::Error> for LLMError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Provider {
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        Self::Transport {
            message: error.to_string(),
        }
    }
}

// Convert from serde_json::Error for malformed provider payloads
impl From<serde_json::Error> for LLMError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse {
            details: error.to_string(),
        }
    }
}
