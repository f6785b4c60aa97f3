use serde::Serialize;

use crate::error::{CollabLinkError, Result};

/// Client-to-server frames.
///
/// The subscribe frame is keyed by `action` and the heartbeat by `type`, so
/// the enum is untagged and each variant carries its own discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// `{"action":"subscribe","projectId":"..."}`, sent once the socket opens.
    Subscribe(SubscribeFrame),
    /// `{"type":"ping"}`, sent on every heartbeat tick.
    Ping(PingFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SubscribeFrame {
    Subscribe {
        #[serde(rename = "projectId")]
        project_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PingFrame {
    Ping,
}

impl ClientFrame {
    pub fn subscribe(project_id: impl Into<String>) -> Self {
        Self::Subscribe(SubscribeFrame::Subscribe {
            project_id: project_id.into(),
        })
    }

    pub fn ping() -> Self {
        Self::Ping(PingFrame::Ping)
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            CollabLinkError::MalformedFrame(format!("Failed to serialize outbound frame: {}", e))
        })
    }
}
