//! Per-command retry policy

use obd_protocol::scale_timeout;
use std::time::Duration;

/// Attempts per command and how the timeout grows between them
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    /// Timeout multiplier applied per retry
    pub backoff_factor: f64,
    /// Upper bound for the multiplier
    pub max_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 1.5,
            max_factor: 3.0,
        }
    }
}

impl RetryPolicy {
    /// Timeout for the zero-based `attempt`
    pub fn timeout_for(&self, base: Duration, attempt: u32) -> Duration {
        let factor = self
            .backoff_factor
            .powi(attempt as i32)
            .min(self.max_factor);
        scale_timeout(base, factor)
    }
}
