//! Per-socket reader task.
//!
//! Owns one open socket: sends the project subscription, emits heartbeat
//! pings, routes inbound frames and reports how the socket ended.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::event_handlers::EventHandlers;
use crate::models::ClientFrame;
use crate::router::MessageRouter;
use crate::transport::{RealtimeSocket, SocketFrame, CLOSE_ABNORMAL, CLOSE_NORMAL};

use super::driver::{CloseRequest, DriverEvent};

/// A duration far enough in the future to act as "never" for a disabled
/// heartbeat without overflowing `Instant::now() + dur`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

pub(crate) struct SocketTask {
    pub(crate) generation: u64,
    pub(crate) project_id: String,
    /// Generation currently owned by the driver.
    pub(crate) live_generation: Arc<AtomicU64>,
    pub(crate) router: MessageRouter,
    pub(crate) handlers: EventHandlers,
    /// Zero disables heartbeats.
    pub(crate) heartbeat_interval: Duration,
    pub(crate) max_text_frame_bytes: usize,
    pub(crate) events: mpsc::UnboundedSender<DriverEvent>,
}

impl SocketTask {
    pub(crate) async fn run(
        self,
        mut socket: Box<dyn RealtimeSocket>,
        mut close_rx: oneshot::Receiver<CloseRequest>,
    ) {
        let subscribe = match ClientFrame::subscribe(self.project_id.as_str()).to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error!("[collab-link] Cannot encode subscribe frame: {}", e);
                socket.close(CLOSE_NORMAL, "client error").await;
                self.report_closed(CLOSE_ABNORMAL, e.to_string());
                return;
            },
        };
        if let Err(e) = socket.send_text(subscribe.clone()).await {
            self.report_closed(CLOSE_ABNORMAL, e.to_string());
            return;
        }
        self.handlers.emit_send(&subscribe);
        log::info!(
            "[collab-link] Subscribed to project {} (generation {})",
            self.project_id,
            self.generation
        );

        let heartbeat_enabled = !self.heartbeat_interval.is_zero();
        let period = if heartbeat_enabled {
            self.heartbeat_interval
        } else {
            FAR_FUTURE
        };
        // One ticker per socket; it dies with this task, so heartbeats never stack.
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = &mut close_rx => {
                    let request = request.unwrap_or_else(|_| CloseRequest {
                        code: CLOSE_NORMAL,
                        reason: "Client dropped".to_string(),
                    });
                    log::debug!(
                        "[collab-link] Closing socket for project {}: {}",
                        self.project_id,
                        request.reason
                    );
                    socket.close(request.code, &request.reason).await;
                    return;
                }

                _ = heartbeat.tick(), if heartbeat_enabled => {
                    let ping = match ClientFrame::ping().to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            log::warn!("[collab-link] Cannot encode ping frame: {}", e);
                            continue;
                        },
                    };
                    if let Err(e) = socket.send_text(ping.clone()).await {
                        log::warn!("[collab-link] Heartbeat failed: {}", e);
                        self.report_closed(CLOSE_ABNORMAL, format!("Heartbeat failed: {}", e));
                        return;
                    }
                    self.handlers.emit_send(&ping);
                }

                frame = socket.next_frame() => {
                    match frame {
                        Some(SocketFrame::Text(text)) => self.dispatch(&text),
                        Some(SocketFrame::Close { code, reason }) => {
                            let _ = self.events.send(DriverEvent::SocketClosing {
                                generation: self.generation,
                            });
                            socket.close(CLOSE_NORMAL, "").await;
                            self.report_closed(code, reason);
                            return;
                        },
                        Some(SocketFrame::Error(message)) => {
                            log::warn!("[collab-link] WebSocket error: {}", message);
                            self.report_closed(CLOSE_ABNORMAL, message);
                            return;
                        },
                        None => {
                            self.report_closed(CLOSE_ABNORMAL, "WebSocket stream ended".to_string());
                            return;
                        },
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        if text.len() > self.max_text_frame_bytes {
            log::warn!(
                "[collab-link] Dropping oversized frame ({} bytes, limit {})",
                text.len(),
                self.max_text_frame_bytes
            );
            return;
        }
        if self.live_generation.load(Ordering::SeqCst) != self.generation {
            log::debug!(
                "[collab-link] Ignoring frame from superseded socket (generation {})",
                self.generation
            );
            return;
        }
        self.handlers.emit_receive(text);
        self.router.handle_message(text, Some(&self.project_id));
    }

    fn report_closed(&self, code: u16, reason: String) {
        let _ = self.events.send(DriverEvent::SocketClosed {
            generation: self.generation,
            code,
            reason,
        });
    }
}
