//! Background connection driver.
//!
//! A single task owns every piece of session state: the bound project, the
//! socket slot, the generation counter, the backoff counter, the sticky
//! auth-failure flag and the reconnect timer.  Public handle methods reach
//! it through [`ConnCmd`]s.  Everything asynchronous it starts (handshake,
//! token refresh, timers, the socket reader) reports back as a
//! [`DriverEvent`] stamped with the generation it was started under; reports
//! from an older generation are dropped without side effects.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock,
};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use crate::auth::TokenGuardian;
use crate::error::{CollabLinkError, Result};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers, OnForbiddenCallback};
use crate::models::{ConnectionOptions, ConnectionState, ConnectionStatus};
use crate::router::MessageRouter;
use crate::timeouts::CollabLinkTimeouts;
use crate::transport::{
    redact_url, resolve_ws_url, Connector, HandshakeError, RealtimeSocket, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};

use super::backoff::ReconnectBackoff;
use super::close_code::{classify, CloseClass, CLOSE_FORBIDDEN, CLOSE_UNAUTHORIZED};
use super::socket_task::SocketTask;

/// Returns `false` while the host application is backgrounded.
pub type VisibilityProbe = Arc<dyn Fn() -> bool + Send + Sync>;

pub(crate) type SharedForbiddenCallback = Arc<RwLock<Option<OnForbiddenCallback>>>;

/// Commands sent from the public API to the driver.
pub(crate) enum ConnCmd {
    Connect {
        project_id: String,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reason: String,
        done_tx: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Reports from tasks spawned by the driver.
pub(crate) enum DriverEvent {
    AttemptFinished {
        generation: u64,
        outcome: AttemptOutcome,
    },
    /// The server sent a close frame; the handshake is completing.
    SocketClosing { generation: u64 },
    SocketClosed {
        generation: u64,
        code: u16,
        reason: String,
    },
    RefreshFinished {
        generation: u64,
        result: Result<()>,
    },
    ReconnectDue { generation: u64 },
    VisibilityPoll { generation: u64 },
}

pub(crate) enum AttemptOutcome {
    Opened(Box<dyn RealtimeSocket>),
    TokenFailed(CollabLinkError),
    Rejected(HandshakeError),
    Failed(CollabLinkError),
}

/// Close request handed to a socket task.
pub(crate) struct CloseRequest {
    pub(crate) code: u16,
    pub(crate) reason: String,
}

enum SocketSlot {
    Idle,
    /// Token acquisition or handshake in flight.
    Connecting { project_id: String, generation: u64 },
    Open {
        project_id: String,
        generation: u64,
        close_tx: oneshot::Sender<CloseRequest>,
    },
    /// Server-initiated close in progress.
    Closing { project_id: String, generation: u64 },
}

impl SocketSlot {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Disconnected,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Open { .. } => ConnectionState::Connected,
            Self::Closing { .. } => ConnectionState::Closing,
        }
    }

    fn generation(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Connecting { generation, .. }
            | Self::Open { generation, .. }
            | Self::Closing { generation, .. } => Some(*generation),
        }
    }

    fn project_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Connecting { project_id, .. }
            | Self::Open { project_id, .. }
            | Self::Closing { project_id, .. } => Some(project_id.as_str()),
        }
    }
}

/// Everything the driver needs from the builder.
pub(crate) struct DriverConfig {
    pub(crate) base_url: Url,
    pub(crate) guardian: TokenGuardian,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) router: MessageRouter,
    pub(crate) handlers: EventHandlers,
    pub(crate) timeouts: CollabLinkTimeouts,
    pub(crate) options: ConnectionOptions,
    pub(crate) visibility: VisibilityProbe,
    pub(crate) status: Arc<RwLock<ConnectionStatus>>,
    pub(crate) on_forbidden: SharedForbiddenCallback,
}

/// Spawn the driver on the current Tokio runtime.
pub(crate) fn spawn_driver(config: DriverConfig, cmd_rx: mpsc::Receiver<ConnCmd>) -> JoinHandle<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let driver = ConnectionDriver {
        backoff: ReconnectBackoff::from_options(&config.options),
        config,
        live_generation: Arc::new(AtomicU64::new(0)),
        cmd_rx,
        event_tx,
        event_rx,
        generation: 0,
        project_id: None,
        slot: SocketSlot::Idle,
        waiters: Vec::new(),
        auth_failure: false,
        reconnect_exhausted: false,
        reconnect_timer: None,
    };
    tokio::spawn(driver.run())
}

struct ConnectionDriver {
    config: DriverConfig,
    live_generation: Arc<AtomicU64>,
    cmd_rx: mpsc::Receiver<ConnCmd>,
    event_tx: mpsc::UnboundedSender<DriverEvent>,
    event_rx: mpsc::UnboundedReceiver<DriverEvent>,

    generation: u64,
    project_id: Option<String>,
    slot: SocketSlot,
    /// `connect` callers waiting on the in-flight attempt.
    waiters: Vec<oneshot::Sender<Result<()>>>,
    backoff: ReconnectBackoff,
    /// Sticky until the next explicit `connect`.
    auth_failure: bool,
    reconnect_exhausted: bool,
    /// Pending reconnect timer or visibility poll.
    reconnect_timer: Option<JoinHandle<()>>,
}

impl ConnectionDriver {
    async fn run(mut self) {
        log::debug!("[collab-link] Connection driver started");
        self.publish_status();
        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Connect { project_id, result_tx }) => {
                        self.handle_connect(project_id, result_tx);
                    },
                    Some(ConnCmd::Disconnect { reason, done_tx }) => {
                        self.handle_disconnect(&reason);
                        self.publish_status();
                        let _ = done_tx.send(());
                    },
                    Some(ConnCmd::Shutdown) | None => {
                        self.handle_disconnect("Client dropped");
                        self.publish_status();
                        log::debug!("[collab-link] Connection driver stopped");
                        return;
                    },
                },

                Some(event) = self.event_rx.recv() => self.handle_event(event),
            }
            self.publish_status();
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    fn handle_connect(&mut self, project_id: String, result_tx: oneshot::Sender<Result<()>>) {
        // An explicit connect is the only way to clear these.
        self.auth_failure = false;
        self.reconnect_exhausted = false;

        match &self.slot {
            SocketSlot::Open { project_id: bound, .. } if *bound == project_id => {
                log::debug!("[collab-link] Already connected to project {}", project_id);
                let _ = result_tx.send(Ok(()));
                return;
            },
            SocketSlot::Connecting { project_id: bound, .. } if *bound == project_id => {
                log::debug!("[collab-link] Connection to project {} already in flight", project_id);
                self.waiters.push(result_tx);
                return;
            },
            SocketSlot::Closing { project_id: bound, .. } => {
                log::info!(
                    "[collab-link] Socket for project {} is closing; skipping connect to {}",
                    bound,
                    project_id
                );
                let _ = result_tx.send(Err(CollabLinkError::Superseded(format!(
                    "socket for project {} is still closing",
                    bound
                ))));
                return;
            },
            _ => {},
        }

        self.teardown("Switching project");
        self.backoff.reset();
        self.waiters.push(result_tx);
        self.start_attempt(project_id);
    }

    fn handle_disconnect(&mut self, reason: &str) {
        self.bump_generation();
        self.cancel_reconnect_timer();
        self.teardown(reason);
        self.project_id = None;
        self.backoff.reset();
        self.reconnect_exhausted = false;
        log::info!("[collab-link] Disconnected: {}", reason);
    }

    /// Release the current socket.  An open socket is closed with 1000; an
    /// in-flight handshake is abandoned and its result discarded on arrival.
    fn teardown(&mut self, reason: &str) {
        match std::mem::replace(&mut self.slot, SocketSlot::Idle) {
            SocketSlot::Idle => {},
            SocketSlot::Connecting { project_id, .. } => {
                log::debug!("[collab-link] Abandoning in-flight connection to {}", project_id);
                self.settle_waiters(Err(CollabLinkError::Superseded(format!(
                    "connection to {} abandoned: {}",
                    project_id, reason
                ))));
            },
            SocketSlot::Open { close_tx, .. } => {
                let _ = close_tx.send(CloseRequest {
                    code: CLOSE_NORMAL,
                    reason: reason.to_string(),
                });
                self.config
                    .handlers
                    .emit_disconnect(DisconnectReason::with_code(reason, CLOSE_NORMAL));
            },
            SocketSlot::Closing { .. } => {},
        }
    }

    fn start_attempt(&mut self, project_id: String) {
        self.cancel_reconnect_timer();
        let generation = self.bump_generation();
        self.project_id = Some(project_id.clone());
        self.slot = SocketSlot::Connecting {
            project_id: project_id.clone(),
            generation,
        };
        log::info!(
            "[collab-link] Connecting to project {} (generation {})",
            project_id,
            generation
        );

        let guardian = self.config.guardian.clone();
        let connector = Arc::clone(&self.config.connector);
        let base_url = self.config.base_url.clone();
        let timeout = self.config.timeouts.connection_timeout;
        let events = self.event_tx.clone();
        tokio::spawn(async move {
            let outcome = open_socket(&guardian, connector.as_ref(), &base_url, timeout).await;
            let _ = events.send(DriverEvent::AttemptFinished {
                generation,
                outcome,
            });
        });
    }

    // ── Events ──────────────────────────────────────────────────────────────

    fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::AttemptFinished {
                generation,
                outcome,
            } => self.on_attempt_finished(generation, outcome),
            DriverEvent::SocketClosing { generation } => {
                if !self.is_current_socket(generation) {
                    return;
                }
                if let SocketSlot::Open { project_id, .. } = &self.slot {
                    self.slot = SocketSlot::Closing {
                        project_id: project_id.clone(),
                        generation,
                    };
                }
            },
            DriverEvent::SocketClosed {
                generation,
                code,
                reason,
            } => {
                if !self.is_current_socket(generation) {
                    log::debug!(
                        "[collab-link] Ignoring close {} from stale generation {}",
                        code,
                        generation
                    );
                    return;
                }
                self.slot = SocketSlot::Idle;
                log::info!("[collab-link] Socket closed (code {}): {}", code, reason);
                self.config
                    .handlers
                    .emit_disconnect(DisconnectReason::with_code(reason.clone(), code));
                self.on_close(code, &reason);
            },
            DriverEvent::RefreshFinished { generation, result } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(()) => self.schedule_reconnect(),
                    Err(e) if e.is_auth_failure() => self.flag_auth_failure(e),
                    Err(e) => {
                        log::warn!("[collab-link] Token refresh unreachable, retrying later: {}", e);
                        self.config
                            .handlers
                            .emit_error(ConnectionError::new(e.to_string(), true));
                        self.schedule_reconnect();
                    },
                }
            },
            DriverEvent::ReconnectDue { generation } => {
                if generation != self.generation {
                    log::debug!("[collab-link] Dropping stale reconnect timer");
                    return;
                }
                self.reconnect_timer = None;
                let project_id = match (&self.project_id, &self.slot) {
                    (Some(project_id), SocketSlot::Idle) if !self.auth_failure => project_id.clone(),
                    _ => {
                        self.backoff.reset();
                        return;
                    },
                };
                log::info!(
                    "[collab-link] Reconnecting to project {} (attempt {})",
                    project_id,
                    self.backoff.attempts()
                );
                self.start_attempt(project_id);
            },
            DriverEvent::VisibilityPoll { generation } => {
                if generation != self.generation {
                    return;
                }
                self.reconnect_timer = None;
                self.schedule_reconnect();
            },
        }
    }

    fn on_attempt_finished(&mut self, generation: u64, outcome: AttemptOutcome) {
        let project_id = match &self.slot {
            SocketSlot::Connecting {
                project_id,
                generation: slot_generation,
            } if *slot_generation == generation && generation == self.generation => {
                project_id.clone()
            },
            _ => {
                // Dropping a stale socket closes it without a close handshake.
                if matches!(outcome, AttemptOutcome::Opened(_)) {
                    log::debug!(
                        "[collab-link] Discarding socket from superseded attempt (generation {})",
                        generation
                    );
                }
                return;
            },
        };

        match outcome {
            AttemptOutcome::Opened(socket) => {
                let (close_tx, close_rx) = oneshot::channel();
                let task = SocketTask {
                    generation,
                    project_id: project_id.clone(),
                    live_generation: Arc::clone(&self.live_generation),
                    router: self.config.router.clone(),
                    handlers: self.config.handlers.clone(),
                    heartbeat_interval: self.config.timeouts.heartbeat_interval,
                    max_text_frame_bytes: self.config.options.max_text_frame_bytes,
                    events: self.event_tx.clone(),
                };
                tokio::spawn(task.run(socket, close_rx));

                self.slot = SocketSlot::Open {
                    project_id: project_id.clone(),
                    generation,
                    close_tx,
                };
                self.backoff.reset();
                self.reconnect_exhausted = false;
                log::info!("[collab-link] Connected to project {}", project_id);
                self.config.handlers.emit_connect(&project_id);
                self.settle_waiters(Ok(()));
            },
            AttemptOutcome::TokenFailed(e) => {
                self.slot = SocketSlot::Idle;
                self.flag_auth_failure(e.clone());
                self.settle_waiters(Err(e));
            },
            AttemptOutcome::Rejected(e) => {
                self.slot = SocketSlot::Idle;
                let (code, message) = match &e {
                    HandshakeError::Forbidden(message) => (CLOSE_FORBIDDEN, message.clone()),
                    HandshakeError::Unauthorized(message) => (CLOSE_UNAUTHORIZED, message.clone()),
                    HandshakeError::Failed(message) => (CLOSE_ABNORMAL, message.clone()),
                };
                log::warn!("[collab-link] Handshake rejected: {}", message);
                self.on_close(code, &message);
                self.settle_waiters(Err(e.into()));
            },
            AttemptOutcome::Failed(e) => {
                self.slot = SocketSlot::Idle;
                log::warn!("[collab-link] Connection attempt failed: {}", e);
                self.config
                    .handlers
                    .emit_error(ConnectionError::new(e.to_string(), true));
                self.schedule_reconnect();
                self.settle_waiters(Err(e));
            },
        }
    }

    /// Decide what follows a close of the current socket.
    fn on_close(&mut self, code: u16, reason: &str) {
        match classify(code, reason) {
            CloseClass::Clean => {
                self.cancel_reconnect_timer();
                self.backoff.reset();
            },
            CloseClass::Forbidden => {
                self.cancel_reconnect_timer();
                self.backoff.reset();
                let project_id = self.project_id.take();
                log::warn!(
                    "[collab-link] Access to project {:?} forbidden (code {}): {}",
                    project_id,
                    code,
                    reason
                );
                self.config.handlers.emit_error(ConnectionError::new(
                    format!("Forbidden: {}", reason),
                    false,
                ));
                if let Some(project_id) = project_id {
                    self.notify_forbidden(&project_id);
                }
            },
            CloseClass::RefreshAndRetry => {
                if self.project_id.is_none()
                    || self.auth_failure
                    || !self.config.options.auto_reconnect
                {
                    return;
                }
                log::debug!("[collab-link] Close code {} may mean an expired token; refreshing", code);
                let guardian = self.config.guardian.clone();
                let events = self.event_tx.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let result = guardian.force_refresh().await.map(|_| ());
                    let _ = events.send(DriverEvent::RefreshFinished { generation, result });
                });
            },
            CloseClass::Retry => self.schedule_reconnect(),
        }
    }

    // ── Reconnection scheduler ──────────────────────────────────────────────

    fn schedule_reconnect(&mut self) {
        if self.auth_failure || !self.config.options.auto_reconnect || self.project_id.is_none() {
            return;
        }
        if self.backoff.is_exhausted() {
            if !self.reconnect_exhausted {
                self.reconnect_exhausted = true;
                log::warn!(
                    "[collab-link] Max reconnection attempts ({}) reached",
                    self.backoff.attempts()
                );
                self.config.handlers.emit_error(ConnectionError::new(
                    format!("Max reconnection attempts ({}) reached", self.backoff.attempts()),
                    false,
                ));
            }
            return;
        }

        self.cancel_reconnect_timer();

        if !(self.config.visibility)() {
            let poll = self.config.timeouts.visibility_poll_interval;
            log::debug!("[collab-link] Not visible; re-checking in {:?}", poll);
            self.spawn_timer(poll, |generation| DriverEvent::VisibilityPoll { generation });
            return;
        }

        if let Some(delay) = self.backoff.next_delay() {
            log::info!(
                "[collab-link] Reconnecting in {:?} (attempt {})",
                delay,
                self.backoff.attempts()
            );
            self.spawn_timer(delay, |generation| DriverEvent::ReconnectDue { generation });
        }
    }

    fn spawn_timer(&mut self, delay: Duration, make_event: fn(u64) -> DriverEvent) {
        let events = self.event_tx.clone();
        let generation = self.generation;
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(make_event(generation));
        }));
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.live_generation.store(self.generation, Ordering::SeqCst);
        self.generation
    }

    fn is_current_socket(&self, generation: u64) -> bool {
        generation == self.generation && self.slot.generation() == Some(generation)
    }

    fn flag_auth_failure(&mut self, error: CollabLinkError) {
        self.auth_failure = true;
        self.cancel_reconnect_timer();
        log::warn!("[collab-link] Authentication failed, automatic reconnect stopped: {}", error);
        self.config
            .handlers
            .emit_error(ConnectionError::new(error.to_string(), false));
    }

    /// Resolve pending `connect` callers.  The status is republished first
    /// so a caller never observes a snapshot older than its own result.
    fn settle_waiters(&mut self, result: Result<()>) {
        if self.waiters.is_empty() {
            return;
        }
        self.publish_status();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn notify_forbidden(&self, project_id: &str) {
        let callback = match self.config.on_forbidden.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match callback {
            Some(callback) => callback(project_id),
            None => log::debug!("[collab-link] No forbidden callback registered"),
        }
    }

    fn publish_status(&self) {
        let snapshot = ConnectionStatus {
            state: self.slot.state(),
            project_id: self
                .project_id
                .clone()
                .or_else(|| self.slot.project_id().map(str::to_string)),
            generation: self.generation,
            reconnect_attempts: self.backoff.attempts(),
            reconnect_scheduled: self.reconnect_timer.is_some(),
            auth_failure_detected: self.auth_failure,
            reconnect_exhausted: self.reconnect_exhausted,
        };
        match self.config.status.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

/// Acquire a fresh token and open the socket.
async fn open_socket(
    guardian: &TokenGuardian,
    connector: &dyn Connector,
    base_url: &Url,
    timeout: Duration,
) -> AttemptOutcome {
    let token = match guardian.ensure_fresh_token().await {
        Ok(token) => token,
        Err(e) if e.is_auth_failure() => return AttemptOutcome::TokenFailed(e),
        Err(e) => return AttemptOutcome::Failed(e),
    };
    let url = match resolve_ws_url(base_url, &token) {
        Ok(url) => url,
        Err(e) => return AttemptOutcome::Failed(e),
    };
    log::debug!("[collab-link] Opening WebSocket to {}", redact_url(&url));

    let result = if CollabLinkTimeouts::is_no_timeout(timeout) {
        connector.connect(url).await
    } else {
        match tokio::time::timeout(timeout, connector.connect(url)).await {
            Ok(result) => result,
            Err(_) => {
                return AttemptOutcome::Failed(CollabLinkError::TimeoutError(format!(
                    "Connection timeout ({:?})",
                    timeout
                )))
            },
        }
    };

    match result {
        Ok(socket) => AttemptOutcome::Opened(socket),
        Err(HandshakeError::Failed(message)) => {
            AttemptOutcome::Failed(CollabLinkError::TransientNetworkFailure(message))
        },
        Err(rejected) => AttemptOutcome::Rejected(rejected),
    }
}
