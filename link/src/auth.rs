//! Credential handling for the real-time connection.
//!
//! - [`provider`]: the [`TokenSource`] seam the host application implements
//! - [`token`]: expiry decoding and the [`TokenGuardian`] that refreshes
//!   credentials before every connection attempt

pub mod provider;
pub mod token;

pub use provider::{ArcTokenSource, StaticTokenSource, TokenSource};
pub use token::{token_expiry, token_is_expired, TokenGuardian};
