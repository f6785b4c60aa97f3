//! Timing configuration for the real-time connection.
//!
//! Centralizes the handshake timeout, heartbeat cadence, background
//! visibility polling and the proactive token refresh window.

use std::time::Duration;

/// Timing configuration for collab-link.
///
/// # Examples
///
/// ```rust
/// use collab_link::CollabLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = CollabLinkTimeouts::default();
///
/// // Custom handshake timeout for slow networks
/// let timeouts = CollabLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollabLinkTimeouts {
    /// Timeout for the WebSocket handshake (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Interval between application-level `{"type":"ping"}` frames while
    /// the socket is open.  Set to 0 to disable heartbeats.
    /// Default: 30 seconds
    pub heartbeat_interval: Duration,

    /// How long to wait before re-checking visibility when a reconnect is
    /// due while the application is in the background.
    /// Default: 5 seconds
    pub visibility_poll_interval: Duration,

    /// Tokens expiring within this window are refreshed before connecting.
    /// Default: 30 seconds
    pub token_refresh_buffer: Duration,
}

impl Default for CollabLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            visibility_poll_interval: Duration::from_secs(5),
            token_refresh_buffer: Duration::from_secs(30),
        }
    }
}

impl CollabLinkTimeouts {
    pub fn builder() -> CollabLinkTimeoutsBuilder {
        CollabLinkTimeoutsBuilder::new()
    }

    /// Timeouts for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`CollabLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct CollabLinkTimeoutsBuilder {
    timeouts: CollabLinkTimeouts,
}

impl CollabLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: CollabLinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    /// Set the heartbeat interval.  Set to 0 to disable heartbeats.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.timeouts.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_interval_secs(self, secs: u64) -> Self {
        self.heartbeat_interval(Duration::from_secs(secs))
    }

    pub fn visibility_poll_interval(mut self, interval: Duration) -> Self {
        self.timeouts.visibility_poll_interval = interval;
        self
    }

    pub fn token_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.timeouts.token_refresh_buffer = buffer;
        self
    }

    pub fn build(self) -> CollabLinkTimeouts {
        self.timeouts
    }
}
