#![allow(dead_code)]
//! Shared fakes for collab-link integration tests.
//!
//! - [`FakeServer`]: in-memory [`Connector`] that records every handshake and
//!   hands out sockets the test can push frames into
//! - [`ScriptedTokenSource`]: token store with a switchable refresh outcome
//! - [`RecordingCache`]: [`QueryCache`] that records every call
//! - [`EventLog`]: lifecycle hooks recorder

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use collab_link::{
    CollabLinkError, ConnectionError, Connector, DisconnectReason, EventHandlers,
    HandshakeError, InvalidateOptions, KeyPredicate, QueryCache, QueryKey, RealtimeClient,
    RealtimeClientBuilder, RealtimeSocket, RefetchOptions, SocketFrame, TokenSource,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use url::Url;

pub const BASE_URL: &str = "http://collab.test/ws";

pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

/// Let every spawned task run to quiescence without crossing a real timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Unsigned three-part token carrying `exp`.
pub fn make_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}

// ── Token source ────────────────────────────────────────────────────────────

pub struct ScriptedTokenSource {
    token: Mutex<Option<String>>,
    refresh_ok: AtomicBool,
    offline: AtomicBool,
    refresh_calls: AtomicUsize,
}

impl ScriptedTokenSource {
    pub fn with_token(token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token),
            refresh_ok: AtomicBool::new(true),
            offline: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
        })
    }

    pub fn valid() -> Arc<Self> {
        Self::with_token(Some(make_jwt(now_secs() + 3600)))
    }

    pub fn expired() -> Arc<Self> {
        Self::with_token(Some(make_jwt(now_secs() - 1)))
    }

    pub fn missing() -> Arc<Self> {
        Self::with_token(None)
    }

    pub fn set_refresh_ok(&self, ok: bool) {
        self.refresh_ok.store(ok, Ordering::SeqCst);
    }

    /// While offline the refresh endpoint cannot be reached.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenSource for ScriptedTokenSource {
    async fn access_token(&self) -> Option<String> {
        self.current()
    }

    async fn refresh_token(&self) -> collab_link::Result<String> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollabLinkError::TransientNetworkFailure(
                "network unreachable".to_string(),
            ));
        }
        if !self.refresh_ok.load(Ordering::SeqCst) {
            return Err(CollabLinkError::RefreshFailed("refresh rejected".to_string()));
        }
        // `sub` varies so each refresh yields a distinct token.
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(
            r#"{{"sub":"refresh-{}","exp":{}}}"#,
            call,
            now_secs() + 3600
        ));
        let fresh = format!("{}.{}.signature", header, payload);
        *self.token.lock().unwrap() = Some(fresh.clone());
        Ok(fresh)
    }
}

// ── Query cache ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCall {
    Invalidate {
        predicate: KeyPredicate,
        refetch_active: bool,
    },
    Remove(QueryKey),
    Refetch {
        key: QueryKey,
        exact: bool,
    },
}

#[derive(Default)]
pub struct RecordingCache {
    calls: Mutex<Vec<CacheCall>>,
}

impl RecordingCache {
    pub fn calls(&self) -> Vec<CacheCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl QueryCache for RecordingCache {
    fn invalidate_queries(&self, predicate: &KeyPredicate, options: InvalidateOptions) {
        self.calls.lock().unwrap().push(CacheCall::Invalidate {
            predicate: predicate.clone(),
            refetch_active: options.refetch_active,
        });
    }

    fn remove_queries(&self, key: &QueryKey) {
        self.calls.lock().unwrap().push(CacheCall::Remove(key.clone()));
    }

    fn refetch_queries(&self, key: &QueryKey, options: RefetchOptions) {
        self.calls.lock().unwrap().push(CacheCall::Refetch {
            key: key.clone(),
            exact: options.exact,
        });
    }
}

// ── Fake server ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct ServerState {
    attempts: Vec<(Url, Instant)>,
    sockets: Vec<SocketHandle>,
    handshake_delay: Duration,
    scripted_failures: VecDeque<HandshakeError>,
    fail_all: bool,
}

/// In-memory WebSocket server.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            server: self.clone(),
        }
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        self.state.lock().unwrap().handshake_delay = delay;
    }

    /// Fail the next handshake with `error`.
    pub fn reject_next(&self, error: HandshakeError) {
        self.state.lock().unwrap().scripted_failures.push_back(error);
    }

    pub fn fail_all_handshakes(&self, fail: bool) {
        self.state.lock().unwrap().fail_all = fail;
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.iter().map(|(_, at)| *at).collect()
    }

    pub fn attempt_urls(&self) -> Vec<Url> {
        self.state.lock().unwrap().attempts.iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn sockets(&self) -> Vec<SocketHandle> {
        self.state.lock().unwrap().sockets.clone()
    }

    pub fn open_sockets(&self) -> Vec<SocketHandle> {
        self.sockets().into_iter().filter(SocketHandle::is_open).collect()
    }

    pub fn last_socket(&self) -> SocketHandle {
        self.sockets().pop().expect("no socket was opened")
    }
}

pub struct FakeConnector {
    server: FakeServer,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: Url) -> Result<Box<dyn RealtimeSocket>, HandshakeError> {
        let (delay, failure) = {
            let mut state = self.server.state.lock().unwrap();
            state.attempts.push((url.clone(), Instant::now()));
            let failure = match state.scripted_failures.pop_front() {
                Some(failure) => Some(failure),
                None if state.fail_all => {
                    Some(HandshakeError::Failed("connection refused".to_string()))
                },
                None => None,
            };
            (state.handshake_delay, failure)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = failure {
            return Err(failure);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let handle = SocketHandle {
            url,
            inbound: inbound_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicBool::new(true)),
            closed_with: Arc::new(Mutex::new(None)),
            close_gate: Arc::new(CloseGate::default()),
        };
        self.server.state.lock().unwrap().sockets.push(handle.clone());
        Ok(Box::new(FakeSocket {
            inbound: inbound_rx,
            sent: Arc::clone(&handle.sent),
            open: Arc::clone(&handle.open),
            closed_with: Arc::clone(&handle.closed_with),
            close_gate: Arc::clone(&handle.close_gate),
        }))
    }
}

/// Server-side view of one socket.
#[derive(Clone)]
pub struct SocketHandle {
    pub url: Url,
    inbound: mpsc::UnboundedSender<SocketFrame>,
    sent: Arc<Mutex<Vec<String>>>,
    open: Arc<AtomicBool>,
    closed_with: Arc<Mutex<Option<(u16, String)>>>,
    close_gate: Arc<CloseGate>,
}

/// Holds the client's `close()` until released, keeping the close
/// handshake in flight.
#[derive(Default)]
struct CloseGate {
    held: AtomicBool,
    released: Notify,
}

impl SocketHandle {
    pub fn push(&self, frame: &str) {
        let _ = self.inbound.send(SocketFrame::Text(frame.to_string()));
    }

    pub fn server_close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(SocketFrame::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Abrupt transport failure (reported as 1006).
    pub fn drop_connection(&self) {
        let _ = self.inbound.send(SocketFrame::Error("connection reset by peer".to_string()));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.sent_json().iter().filter(|frame| frame["type"] == "ping").count()
    }

    pub fn subscribed_project(&self) -> Option<String> {
        self.sent_json()
            .iter()
            .find(|frame| frame["action"] == "subscribe")
            .and_then(|frame| frame["projectId"].as_str().map(str::to_string))
    }

    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }

    /// Keep the next close handshake pending until [`Self::release_close`].
    pub fn hold_close(&self) {
        self.close_gate.held.store(true, Ordering::SeqCst);
    }

    pub fn release_close(&self) {
        self.close_gate.held.store(false, Ordering::SeqCst);
        self.close_gate.released.notify_waiters();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with.lock().unwrap().clone()
    }
}

struct FakeSocket {
    inbound: mpsc::UnboundedReceiver<SocketFrame>,
    sent: Arc<Mutex<Vec<String>>>,
    open: Arc<AtomicBool>,
    closed_with: Arc<Mutex<Option<(u16, String)>>>,
    close_gate: Arc<CloseGate>,
}

#[async_trait]
impl RealtimeSocket for FakeSocket {
    async fn send_text(&mut self, text: String) -> collab_link::Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CollabLinkError::TransientNetworkFailure("socket closed".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<SocketFrame> {
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16, reason: &str) {
        loop {
            let released = self.close_gate.released.notified();
            if !self.close_gate.held.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
        self.open.store(false, Ordering::SeqCst);
        let mut closed_with = self.closed_with.lock().unwrap();
        if closed_with.is_none() {
            *closed_with = Some((code, reason.to_string()));
        }
    }
}

impl Drop for FakeSocket {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

// ── Lifecycle hooks ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct EventLog {
    connects: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<Mutex<Vec<DisconnectReason>>>,
    errors: Arc<Mutex<Vec<ConnectionError>>>,
}

impl EventLog {
    pub fn handlers(&self) -> EventHandlers {
        let connects = Arc::clone(&self.connects);
        let disconnects = Arc::clone(&self.disconnects);
        let errors = Arc::clone(&self.errors);
        EventHandlers::new()
            .on_connect(move |project_id| connects.lock().unwrap().push(project_id.to_string()))
            .on_disconnect(move |reason| disconnects.lock().unwrap().push(reason))
            .on_error(move |error| errors.lock().unwrap().push(error))
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ConnectionError> {
        self.errors.lock().unwrap().clone()
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

pub struct Harness {
    pub client: RealtimeClient,
    pub server: FakeServer,
    pub tokens: Arc<ScriptedTokenSource>,
    pub cache: Arc<RecordingCache>,
    pub events: EventLog,
    pub forbidden: Arc<Mutex<Vec<String>>>,
}

pub fn harness() -> Harness {
    harness_with(ScriptedTokenSource::valid(), |builder| builder)
}

/// Build a client over fakes.  `configure` may adjust the builder.
pub fn harness_with(
    tokens: Arc<ScriptedTokenSource>,
    configure: impl FnOnce(RealtimeClientBuilder) -> RealtimeClientBuilder,
) -> Harness {
    init_logger();
    let server = FakeServer::default();
    let cache = Arc::new(RecordingCache::default());
    let events = EventLog::default();

    let builder = RealtimeClient::builder()
        .base_url(BASE_URL)
        .token_source_arc(tokens.clone())
        .query_cache_arc(cache.clone())
        .connector(server.connector())
        .event_handlers(events.handlers());
    let client = configure(builder).build().expect("client should build");

    let forbidden = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&forbidden);
    client.set_on_forbidden_callback(move |project_id| {
        sink.lock().unwrap().push(project_id.to_string());
    });

    Harness {
        client,
        server,
        tokens,
        cache,
        events,
        forbidden,
    }
}
