//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Short label used as the reconnect metric reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connect_error",
            Self::Tungstenite(_) => "transport_error",
            Self::ConnectionClosed { .. } => "closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::SendFailed(_) => "send_error",
            Self::ParseError(_) | Self::UnknownEventType(_) | Self::Json(_) => "protocol",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
