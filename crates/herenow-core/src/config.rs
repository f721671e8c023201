//! Connection Configuration
//!
//! Policy parameters for the realtime connection manager. Values mirror the
//! production deployment defaults; everything here is configurable rather
//! than hard-coded in the lifecycle code.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{HerenowError, Result};
use crate::retry::RetryPolicy;
use crate::types::AppId;

// ----------------------------------------------------------------------------
// Connection Configuration
// ----------------------------------------------------------------------------

/// Configuration for a connection manager instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base channel endpoint, e.g. `wss://example.com/realtime`. The bearer
    /// credential is appended as a `token` query parameter at open time.
    pub endpoint: String,
    /// This client's application identity; inbound messages tagged with a
    /// different identity are dropped before dispatch
    pub app_id: AppId,
    /// Reconnection backoff policy
    pub retry: RetryPolicy,
    /// Interval between heartbeat probes while the channel is open
    pub heartbeat_interval: Duration,
    /// Optional bound on a single in-flight open attempt. `None` reproduces
    /// the source behavior of waiting indefinitely for the transport to
    /// resolve.
    pub connect_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Create a configuration with production defaults
    pub fn new(endpoint: impl Into<String>, app_id: impl Into<AppId>) -> Self {
        Self {
            endpoint: endpoint.into(),
            app_id: app_id.into(),
            retry: RetryPolicy::default(),
            heartbeat_interval: Duration::from_millis(25_000),
            connect_timeout: None,
        }
    }

    /// Create a configuration with short timings for testing
    pub fn testing(endpoint: impl Into<String>, app_id: impl Into<AppId>) -> Self {
        Self {
            endpoint: endpoint.into(),
            app_id: app_id.into(),
            retry: RetryPolicy::testing(),
            heartbeat_interval: Duration::from_millis(100),
            connect_timeout: Some(Duration::from_millis(500)),
        }
    }

    /// Builder method for customizing the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder method for customizing the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Builder method for bounding in-flight open attempts
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(HerenowError::config_error("Endpoint cannot be empty"));
        }
        if self.app_id.as_str().is_empty() {
            return Err(HerenowError::config_error(
                "Application identity cannot be empty",
            ));
        }
        if self.retry.base_delay.is_zero() {
            return Err(HerenowError::config_error(
                "Retry base delay cannot be zero",
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(HerenowError::config_error(
                "Heartbeat interval cannot be zero",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = ConnectionConfig::new("wss://example.com/realtime", "herenow");
        assert_eq!(config.heartbeat_interval, Duration::from_millis(25_000));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
        assert!(config.connect_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_preset_is_fast() {
        let config = ConnectionConfig::testing("wss://example.com/realtime", "herenow");
        assert!(config.heartbeat_interval < Duration::from_secs(1));
        assert!(config.connect_timeout.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = ConnectionConfig::new("wss://example.com/realtime", "herenow")
            .with_retry(RetryPolicy::new(3, Duration::from_millis(500)))
            .with_heartbeat_interval(Duration::from_secs(10))
            .with_connect_timeout(Duration::from_secs(5));

        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ConnectionConfig::new("", "herenow");
        assert!(config.validate().is_err());

        let config = ConnectionConfig::new("wss://example.com", "");
        assert!(config.validate().is_err());

        let mut config = ConnectionConfig::new("wss://example.com", "herenow");
        config.retry.base_delay = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
