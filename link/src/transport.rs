//! WebSocket transport seam.
//!
//! The connection driver only talks to [`Connector`] and [`RealtimeSocket`].
//! [`TungsteniteConnector`] is the production implementation; tests plug in
//! an in-memory one.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    error::Error as WsError,
    protocol::{frame::coding::CloseCode, CloseFrame, Message},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{CollabLinkError, Result};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (page unload, server restart).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// What the reader sees on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    /// Server-initiated close.  `code` is 1005 when the frame had no status.
    Close { code: u16, reason: String },
    /// Transport failure; the socket is unusable afterwards.
    Error(String),
}

/// Why a handshake did not produce a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// HTTP 401 on upgrade; handled like close code 4001.
    Unauthorized(String),
    /// HTTP 403 on upgrade; handled like close code 4003.
    Forbidden(String),
    /// Anything else, including DNS, TCP and TLS failures.
    Failed(String),
}

impl From<HandshakeError> for CollabLinkError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Forbidden(msg) => CollabLinkError::Forbidden(msg),
            HandshakeError::Unauthorized(msg) | HandshakeError::Failed(msg) => {
                CollabLinkError::TransientNetworkFailure(msg)
            },
        }
    }
}

/// An open, bidirectional text socket.
#[async_trait]
pub trait RealtimeSocket: Send + 'static {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next application frame.  `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<SocketFrame>;

    /// Start (or answer) the close handshake.  Best effort.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Opens sockets for fully resolved URLs.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: Url) -> std::result::Result<Box<dyn RealtimeSocket>, HandshakeError>;
}

/// Build the socket URL: map the scheme to `ws`/`wss` and set the `token`
/// query parameter, replacing any existing one.
pub fn resolve_ws_url(base: &Url, token: &str) -> Result<Url> {
    if !base.username().is_empty() || base.password().is_some() {
        return Err(CollabLinkError::ConfigurationError(
            "base_url must not embed credentials".to_string(),
        ));
    }
    if base.fragment().is_some() {
        return Err(CollabLinkError::ConfigurationError(
            "base_url must not contain a fragment".to_string(),
        ));
    }

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CollabLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )))
        },
    };
    if base.host_str().is_none() {
        return Err(CollabLinkError::ConfigurationError(
            "base_url has no host".to_string(),
        ));
    }

    let mut url = base.clone();
    // http -> ws is a special-to-special scheme change, which `set_scheme` allows.
    url.set_scheme(ws_scheme).map_err(|_| {
        CollabLinkError::ConfigurationError(format!("Cannot use '{}' as a WebSocket URL", base))
    })?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "token")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("token", token);
    }
    Ok(url)
}

/// Redact the `token` parameter for logging.
pub(crate) fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    redacted.set_query(None);
    redacted.to_string()
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: Url) -> std::result::Result<Box<dyn RealtimeSocket>, HandshakeError> {
        let request = url.as_str().into_client_request().map_err(|e| {
            HandshakeError::Failed(format!("Failed to build WebSocket request: {}", e))
        })?;

        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _)) => Ok(Box::new(TungsteniteSocket { stream })),
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                Err(match status {
                    401 => HandshakeError::Unauthorized(
                        "Unauthorized: WebSocket requires valid credentials".to_string(),
                    ),
                    403 => HandshakeError::Forbidden(
                        "Forbidden: Access to WebSocket denied".to_string(),
                    ),
                    code => HandshakeError::Failed(format!("WebSocket HTTP error: {}", code)),
                })
            },
            Err(e) => Err(HandshakeError::Failed(format!("Connection failed: {}", e))),
        }
    }
}

/// A live `tokio-tungstenite` stream.
pub struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeSocket for TungsteniteSocket {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| CollabLinkError::TransientNetworkFailure(format!("Send failed: {}", e)))
    }

    async fn next_frame(&mut self) -> Option<SocketFrame> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(SocketFrame::Error(e.to_string())),
            };
            match message {
                Message::Text(text) => return Some(SocketFrame::Text(text.as_str().to_owned())),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(SocketFrame::Text(text)),
                    Err(_) => {
                        log::warn!(
                            "[collab-link] Dropping non-UTF-8 binary frame ({} bytes)",
                            data.len()
                        );
                    },
                },
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.as_str().to_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    return Some(SocketFrame::Close { code, reason });
                },
                Message::Ping(payload) => {
                    let _ = self.stream.send(Message::Pong(payload)).await;
                },
                Message::Pong(_) | Message::Frame(_) => {},
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            log::debug!("[collab-link] Close handshake did not complete: {}", e);
        }
    }
}
