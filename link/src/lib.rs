//! # collab-link
//!
//! Real-time cache-invalidation client for the project collaboration
//! workspace.
//!
//! The client keeps one WebSocket open for the project the user is looking
//! at, and turns the server's change notifications into invalidations on the
//! application's query cache.  It handles:
//!
//! - Token freshness: every connection attempt starts from a token that is
//!   valid for at least another 30 seconds
//! - One socket per session: switching projects tears the old socket down
//! - Reconnection with capped exponential backoff, paused while the
//!   application is not visible
//! - Stale callback suppression through a connection generation counter
//! - Routing of typed and legacy `cache_invalidate` events to cache keys
//!
//! ## Example
//!
//! ```rust,no_run
//! use collab_link::{
//!     InvalidateOptions, KeyPredicate, QueryCache, QueryKey, RealtimeClient, RefetchOptions,
//!     StaticTokenSource,
//! };
//!
//! struct AppCache;
//!
//! impl QueryCache for AppCache {
//!     fn invalidate_queries(&self, predicate: &KeyPredicate, options: InvalidateOptions) {
//!         println!("invalidate {} (refetch active: {})", predicate, options.refetch_active);
//!     }
//!     fn remove_queries(&self, key: &QueryKey) {
//!         println!("remove {}", key);
//!     }
//!     fn refetch_queries(&self, key: &QueryKey, _options: RefetchOptions) {
//!         println!("refetch {}", key);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> collab_link::Result<()> {
//!     let client = RealtimeClient::builder()
//!         .base_url("https://api.example.com/ws")
//!         .token_source(StaticTokenSource::new("eyJhbGciOi..."))
//!         .query_cache(AppCache)
//!         .build()?;
//!
//!     client.connect("project-1").await?;
//!     println!("{:?}", client.connection_status());
//!     client.disconnect(None).await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod router;
pub mod timeouts;
pub mod transport;

pub use auth::{ArcTokenSource, StaticTokenSource, TokenGuardian, TokenSource};
pub use cache::{
    keys, ArcQueryCache, InvalidateOptions, KeyPredicate, QueryCache, QueryKey, RefetchOptions,
};
pub use client::{RealtimeClient, RealtimeClientBuilder};
pub use connection::VisibilityProbe;
pub use error::{CollabLinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers, OnForbiddenCallback};
pub use models::{
    CacheInvalidation, ChangeKind, ClientFrame, ConnectionOptions, ConnectionState,
    ConnectionStatus, InboundEvent, MutationAction, Resource,
};
pub use router::MessageRouter;
pub use timeouts::{CollabLinkTimeouts, CollabLinkTimeoutsBuilder};
pub use transport::{
    resolve_ws_url, Connector, HandshakeError, RealtimeSocket, SocketFrame, TungsteniteConnector,
};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
