//! Access-token provider for the real-time client.
//!
//! The host application owns the session: it knows where the current access
//! token lives and how to rotate it.  Implement [`TokenSource`] to hand both
//! operations to the client.
//!
//! ```rust,no_run
//! use collab_link::{CollabLinkError, TokenSource};
//!
//! struct SessionStore { /* ... */ }
//!
//! #[async_trait::async_trait]
//! impl TokenSource for SessionStore {
//!     async fn access_token(&self) -> Option<String> {
//!         Some("eyJhbGc...".into())
//!     }
//!
//!     async fn refresh_token(&self) -> collab_link::Result<String> {
//!         Err(CollabLinkError::RefreshFailed("session expired".into()))
//!     }
//! }
//! ```

use crate::error::{CollabLinkError, Result};
use std::sync::Arc;

/// Source of access tokens, consulted before every connect and reconnect.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// The currently stored access token, if any.
    async fn access_token(&self) -> Option<String>;

    /// Force a refresh and return the new token.
    ///
    /// Fails when the refresh endpoint rejects the session.
    async fn refresh_token(&self) -> Result<String>;
}

/// A reference-counted [`TokenSource`].
pub type ArcTokenSource = Arc<dyn TokenSource>;

/// A fixed token with no refresh capability.
///
/// Useful for service accounts and CLI tools holding a long-lived token.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: Option<String>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A source with no token at all.
    pub fn none() -> Self {
        Self { token: None }
    }
}

impl std::fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenSource")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }

    async fn refresh_token(&self) -> Result<String> {
        Err(CollabLinkError::RefreshFailed(
            "static token source cannot refresh".to_string(),
        ))
    }
}
