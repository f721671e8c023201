//! Reconnection Policy
//!
//! Pure exponential-backoff policy consulted by the link state machine when
//! a channel closes unexpectedly. The attempt counter itself lives in the
//! state machine; this type only answers "how long" and "whether at all".

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// Exponential backoff policy for reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of automatic reconnection attempts before the link
    /// is declared permanently lost
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each consecutive failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Create a policy with short delays for testing
    pub fn testing() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
        }
    }

    /// Delay before retrying after the failure of attempt `attempt`:
    /// `base_delay * 2^attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Whether attempt number `attempt` may still be issued automatically
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
