//! Token expiry decoding and proactive refresh.
//!
//! Access tokens are JWTs: three dot-separated segments whose middle segment
//! is a base64url-encoded JSON object carrying an `exp` claim in seconds
//! since the Unix epoch.  The signature is never verified here; the server
//! does that.  The client only needs to know whether the token is about to
//! expire so it can refresh before opening a socket.

use crate::auth::provider::ArcTokenSource;
use crate::error::{CollabLinkError, Result};
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Decode the `exp` claim of a JWT.
///
/// Returns `None` when the token is not a three-part JWT, the payload is not
/// valid base64url JSON, or `exp` is missing or not an integer.
pub fn token_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

/// Whether `token` must be refreshed at `now_secs`.
///
/// A token counts as expired once `now + buffer >= exp`.  An undecodable
/// token is treated as expired.
pub fn token_is_expired(token: &str, now_secs: i64, buffer: Duration) -> bool {
    match token_expiry(token) {
        Some(exp) => now_secs.saturating_add(buffer.as_secs() as i64) >= exp,
        None => true,
    }
}

/// Hands out a non-expired access token before every connection attempt.
///
/// Tokens are never cached between attempts; the [`TokenSource`] is asked
/// again each time.
///
/// [`TokenSource`]: crate::auth::TokenSource
#[derive(Clone)]
pub struct TokenGuardian {
    source: ArcTokenSource,
    refresh_buffer: Duration,
}

impl TokenGuardian {
    pub fn new(source: ArcTokenSource, refresh_buffer: Duration) -> Self {
        Self {
            source,
            refresh_buffer,
        }
    }

    /// Return a token that will stay valid for at least the refresh buffer.
    ///
    /// Fails with [`CollabLinkError::AuthUnavailable`] when no token is
    /// stored and with [`CollabLinkError::RefreshFailed`] when the refresh
    /// does not yield a usable token.  An unreachable refresh endpoint
    /// surfaces as a network failure instead.
    pub async fn ensure_fresh_token(&self) -> Result<String> {
        let token = match self.source.access_token().await {
            Some(token) if !token.trim().is_empty() => token,
            _ => return Err(CollabLinkError::AuthUnavailable),
        };

        if !token_is_expired(&token, now_secs(), self.refresh_buffer) {
            return Ok(token);
        }

        log::debug!("[collab-link] Access token expired or expiring soon, refreshing");
        let fresh = self.force_refresh().await?;
        log::info!("[collab-link] Access token refreshed");
        Ok(fresh)
    }

    /// Force a refresh regardless of the stored token's expiry.
    ///
    /// A refresh that could not reach the endpoint keeps its
    /// [`CollabLinkError::TransientNetworkFailure`] or
    /// [`CollabLinkError::TimeoutError`]; everything else is a rejection.
    pub async fn force_refresh(&self) -> Result<String> {
        match self.source.refresh_token().await {
            Ok(fresh) if !fresh.trim().is_empty() => Ok(fresh),
            Ok(_) => Err(CollabLinkError::RefreshFailed(
                "refresh returned an empty token".to_string(),
            )),
            Err(e @ CollabLinkError::TransientNetworkFailure(_))
            | Err(e @ CollabLinkError::TimeoutError(_))
            | Err(e @ CollabLinkError::RefreshFailed(_)) => Err(e),
            Err(e) => Err(CollabLinkError::RefreshFailed(e.to_string())),
        }
    }
}

impl std::fmt::Debug for TokenGuardian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuardian")
            .field("refresh_buffer", &self.refresh_buffer)
            .finish()
    }
}
