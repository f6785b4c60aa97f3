use std::time::Duration;

use crate::models::ConnectionOptions;

/// Exponential reconnect backoff with a delay ceiling and an attempt cap.
///
/// Delay for attempt `n` (1-based) is `min(base * 2^(n-1), max)`.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectBackoff {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectBackoff {
    pub(crate) fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_ms,
            max_attempts,
            attempts: 0,
        }
    }

    pub(crate) fn from_options(options: &ConnectionOptions) -> Self {
        Self::new(
            options.reconnect_delay_ms,
            options.max_reconnect_delay_ms,
            options.max_reconnect_attempts,
        )
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Count one more attempt and return its delay, or `None` once the cap
    /// has been reached.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        let factor = 1u64.checked_shl(self.attempts - 1).unwrap_or(u64::MAX);
        let delay_ms = self.base_ms.saturating_mul(factor).min(self.max_ms);
        Some(Duration::from_millis(delay_ms))
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }
}
