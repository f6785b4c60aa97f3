//! Real-time client with builder pattern.
//!
//! [`RealtimeClient`] is a cheap, cloneable handle onto a background
//! connection driver.  One client per application; reuse it across views.

use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::{
    auth::{ArcTokenSource, TokenGuardian, TokenSource},
    cache::{ArcQueryCache, QueryCache},
    connection::{spawn_driver, ConnCmd, DriverConfig, SharedForbiddenCallback, VisibilityProbe},
    error::{CollabLinkError, Result},
    event_handlers::{EventHandlers, OnForbiddenCallback},
    models::{ConnectionOptions, ConnectionStatus},
    router::MessageRouter,
    timeouts::CollabLinkTimeouts,
    transport::{resolve_ws_url, Connector, TungsteniteConnector},
};

/// Capacity of the command channel between handles and the driver.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Real-time cache-invalidation client.
///
/// Use [`RealtimeClientBuilder`] to construct instances.
///
/// # Examples
///
/// ```rust,no_run
/// use collab_link::{RealtimeClient, StaticTokenSource};
/// # use collab_link::{InvalidateOptions, KeyPredicate, QueryCache, QueryKey, RefetchOptions};
/// # use std::sync::Arc;
/// # struct AppCache;
/// # impl QueryCache for AppCache {
/// #     fn invalidate_queries(&self, _: &KeyPredicate, _: InvalidateOptions) {}
/// #     fn remove_queries(&self, _: &QueryKey) {}
/// #     fn refetch_queries(&self, _: &QueryKey, _: RefetchOptions) {}
/// # }
///
/// # async fn example() -> collab_link::Result<()> {
/// let client = RealtimeClient::builder()
///     .base_url("https://api.example.com/ws")
///     .token_source(StaticTokenSource::new("eyJ..."))
///     .query_cache(AppCache)
///     .build()?;
///
/// client.set_on_forbidden_callback(|project_id| {
///     eprintln!("lost access to {}", project_id);
/// });
/// client.connect("project-1").await?;
/// assert!(client.is_connected());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    cmd_tx: mpsc::Sender<ConnCmd>,
    status: Arc<RwLock<ConnectionStatus>>,
    on_forbidden: SharedForbiddenCallback,
    base_url: Url,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // Best-effort: the driver also stops once every sender is gone.
        let _ = self.cmd_tx.try_send(ConnCmd::Shutdown);
    }
}

impl RealtimeClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> RealtimeClientBuilder {
        RealtimeClientBuilder::new()
    }

    /// Bind the session to `project_id` and open the socket.
    ///
    /// Resolves once the socket is open; the subscribe frame follows on the
    /// socket task.  Connecting to the project that is already open, or already being
    /// connected to, does not open a second socket.  A different project
    /// tears down the current socket first.
    ///
    /// Fails with [`CollabLinkError::Superseded`] when a later `connect` or
    /// `disconnect` abandons this attempt, or when the previous socket is
    /// still finishing a server-initiated close.  Network failures are returned
    /// here but retried in the background.
    pub async fn connect(&self, project_id: &str) -> Result<()> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(CollabLinkError::ConfigurationError(
                "project_id must not be empty".to_string(),
            ));
        }

        let (result_tx, result_rx) = oneshot::channel();
        self.send(ConnCmd::Connect {
            project_id: project_id.to_string(),
            result_tx,
        })
        .await?;
        result_rx
            .await
            .map_err(|_| CollabLinkError::ConnectionClosed("connection driver stopped".to_string()))?
    }

    /// Close the socket, cancel pending reconnects and unbind the project.
    ///
    /// A sticky auth failure survives until the next [`connect`](Self::connect).
    pub async fn disconnect(&self, reason: Option<&str>) {
        let (done_tx, done_rx) = oneshot::channel();
        let reason = reason.unwrap_or("Client disconnected").to_string();
        if self.send(ConnCmd::Disconnect { reason, done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status().is_connected()
    }

    /// Diagnostic snapshot of the session.
    pub fn connection_status(&self) -> ConnectionStatus {
        match self.inner.status.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Register the callback invoked with the project id when the server
    /// rejects access to the bound project.  Replaces any previous one.
    pub fn set_on_forbidden_callback(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.store_forbidden_callback(Some(Arc::new(f)));
    }

    pub fn clear_on_forbidden_callback(&self) {
        self.store_forbidden_callback(None);
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn store_forbidden_callback(&self, callback: Option<OnForbiddenCallback>) {
        match self.inner.on_forbidden.write() {
            Ok(mut guard) => *guard = callback,
            Err(poisoned) => *poisoned.into_inner() = callback,
        }
    }

    async fn send(&self, cmd: ConnCmd) -> Result<()> {
        self.inner
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| CollabLinkError::ConnectionClosed("connection driver stopped".to_string()))
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("status", &self.connection_status())
            .finish()
    }
}

/// Builder for configuring [`RealtimeClient`] instances.
pub struct RealtimeClientBuilder {
    base_url: Option<String>,
    token_source: Option<ArcTokenSource>,
    query_cache: Option<ArcQueryCache>,
    connector: Option<Arc<dyn Connector>>,
    timeouts: CollabLinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
    visibility: Option<VisibilityProbe>,
}

impl RealtimeClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            token_source: None,
            query_cache: None,
            connector: None,
            timeouts: CollabLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            event_handlers: EventHandlers::default(),
            visibility: None,
        }
    }

    /// WebSocket endpoint; `http(s)` is mapped to `ws(s)`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn token_source(mut self, source: impl TokenSource) -> Self {
        self.token_source = Some(Arc::new(source));
        self
    }

    /// Share a token source that the application also uses elsewhere.
    pub fn token_source_arc(mut self, source: ArcTokenSource) -> Self {
        self.token_source = Some(source);
        self
    }

    pub fn query_cache(mut self, cache: impl QueryCache) -> Self {
        self.query_cache = Some(Arc::new(cache));
        self
    }

    pub fn query_cache_arc(mut self, cache: ArcQueryCache) -> Self {
        self.query_cache = Some(cache);
        self
    }

    /// Replace the WebSocket transport.  Defaults to [`TungsteniteConnector`].
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn timeouts(mut self, timeouts: CollabLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Reconnection and framing options.
    ///
    /// # Example
    ///
    /// ```rust
    /// use collab_link::{ConnectionOptions, RealtimeClient};
    ///
    /// let builder = RealtimeClient::builder()
    ///     .base_url("wss://api.example.com/ws")
    ///     .connection_options(
    ///         ConnectionOptions::new()
    ///             .with_max_reconnect_attempts(5)
    ///             .with_max_reconnect_delay_ms(10_000),
    ///     );
    /// ```
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Probe consulted before each reconnect; while it returns `false` the
    /// scheduler only polls.  Defaults to always visible.
    pub fn visibility(mut self, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.visibility = Some(Arc::new(probe));
        self
    }

    /// Build the client and start its connection driver.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<RealtimeClient> {
        let raw_url = self
            .base_url
            .ok_or_else(|| CollabLinkError::ConfigurationError("base_url is required".into()))?;
        let base_url = Url::parse(raw_url.trim()).map_err(|e| {
            CollabLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", raw_url, e))
        })?;
        // Reject schemes and shapes the socket URL could never be built from.
        resolve_ws_url(&base_url, "")?;

        let token_source = self
            .token_source
            .ok_or_else(|| CollabLinkError::ConfigurationError("token_source is required".into()))?;
        let query_cache = self
            .query_cache
            .ok_or_else(|| CollabLinkError::ConfigurationError("query_cache is required".into()))?;

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TungsteniteConnector::new()),
        };
        let visibility: VisibilityProbe = match self.visibility {
            Some(probe) => probe,
            None => Arc::new(|| true),
        };

        let status = Arc::new(RwLock::new(ConnectionStatus::default()));
        let on_forbidden: SharedForbiddenCallback = Arc::new(RwLock::new(None));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        log::debug!("[collab-link] Building client for {}", base_url);
        spawn_driver(
            DriverConfig {
                base_url: base_url.clone(),
                guardian: TokenGuardian::new(token_source, self.timeouts.token_refresh_buffer),
                connector,
                router: MessageRouter::new(query_cache),
                handlers: self.event_handlers,
                timeouts: self.timeouts,
                options: self.connection_options,
                visibility,
                status: Arc::clone(&status),
                on_forbidden: Arc::clone(&on_forbidden),
            },
            cmd_rx,
        );

        Ok(RealtimeClient {
            inner: Arc::new(ClientInner {
                cmd_tx,
                status,
                on_forbidden,
                base_url,
            }),
        })
    }
}

impl Default for RealtimeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
