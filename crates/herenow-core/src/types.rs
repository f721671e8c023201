//! Core types for the Herenow realtime protocol
//!
//! Newtype wrappers for the two identity values that flow through the
//! connection manager: the application identity and the bearer credential.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Application Identity
// ----------------------------------------------------------------------------

/// Application identity tag carried by every envelope.
///
/// The realtime channel is shared between tenants; inbound messages whose
/// tag differs from this client's configured identity are dropped before
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// Create a new application identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AppId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AppId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ----------------------------------------------------------------------------
// Bearer Credential
// ----------------------------------------------------------------------------

/// Bearer credential used to open the channel.
///
/// Supplied by an external auth module; present/absent drives the connection
/// lifecycle. The raw value is redacted from `Debug` output so tokens never
/// land in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Create a new credential
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
