//! Invocation semantic configuration.

use std::time::Duration;

use crate::RetryPolicy;

/// Tunables for the invocation semantics.
#[derive(Debug, Clone)]
pub struct InvokeConfig {
    /// Retries after a failed connect (or failed result read).
    /// Default: 2, so three attempts in total.
    pub retry_connect: u32,
    /// Pause between two attempts. Default: 50 ms.
    pub retry_backoff: Duration,
    /// How long a computed result waits for a usable connector, counted
    /// from the moment the call completed. Default: 5000 ms.
    pub disposal_timeout: Duration,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            retry_connect: 2,
            retry_backoff: Duration::from_millis(50),
            disposal_timeout: Duration::from_millis(5000),
        }
    }
}

impl InvokeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_connect, self.retry_backoff)
    }
}
