//! Error types for the Herenow realtime protocol
//!
//! A single `HerenowError` unifies the failure modes of the connection
//! subsystem. Connectivity errors never escape the manager under normal
//! operation; these types cover the internal paths and the configuration
//! surface.

// ----------------------------------------------------------------------------
// Core Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Herenow realtime client
#[derive(Debug, thiserror::Error)]
pub enum HerenowError {
    /// Transport-level failure (failed open, broken channel)
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// Envelope serialization or parse failure
    #[error("Invalid envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    /// Opaque payload field with broken base64 encoding
    #[error("Invalid payload encoding: {0}")]
    PayloadEncoding(#[from] base64::DecodeError),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Internal channel communication error
    #[error("Channel error: {message}")]
    Channel { message: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl HerenowError {
    /// Create a transport error with a reason
    pub fn transport<T: Into<String>>(reason: T) -> Self {
        HerenowError::Transport {
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        HerenowError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        HerenowError::Channel {
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, HerenowError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
