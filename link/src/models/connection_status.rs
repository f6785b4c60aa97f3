use serde::{Deserialize, Serialize};

/// Lifecycle state of the project socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Token acquisition or WebSocket handshake in flight.
    Connecting,
    /// Socket open and subscribed.
    Connected,
    /// The server started the close handshake.
    Closing,
}

/// Diagnostic snapshot of the connection session.
///
/// Republished by the connection driver after every state change, so
/// reading it never waits on the network.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Project the session is bound to, if any.
    pub project_id: Option<String>,
    /// Current connection epoch.
    pub generation: u64,
    pub reconnect_attempts: u32,
    /// A reconnect timer or visibility poll is pending.
    pub reconnect_scheduled: bool,
    /// Sticky until the next explicit `connect`.
    pub auth_failure_detected: bool,
    /// The attempt cap was reached; only an explicit `connect` resumes.
    pub reconnect_exhausted: bool,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
