//! Error types for collab-link

use thiserror::Error;

/// Errors surfaced by the real-time client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollabLinkError {
    /// No access token is available at all.
    #[error("No access token available")]
    AuthUnavailable,

    /// The refresh primitive rejected the refresh or returned an unusable token.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Project-level authorization was rejected by the server.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Any other abnormal close, handshake or transport failure.
    #[error("Network failure: {0}")]
    TransientNetworkFailure(String),

    /// Unparseable or structurally invalid inbound frame.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// The attempt was torn down by a later `connect` or `disconnect`, or
    /// skipped while the previous socket was still closing.
    #[error("Connection attempt superseded: {0}")]
    Superseded(String),

    /// The background connection driver is no longer running.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}

impl CollabLinkError {
    /// `true` for failures that stop automatic reconnection.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthUnavailable | Self::RefreshFailed(_))
    }
}

/// Result type for collab-link operations
pub type Result<T> = std::result::Result<T, CollabLinkError>;
