//! Push wire format.
//!
//! Every frame is a JSON text message `{"type": string, "data": object}`.
//! Control frames (`ping`, `pong`, `subscribe`, `connection.established`)
//! never reach subscribers; every other `type` must be a known `EventKind`.

use crate::error::{WsError, WsResult};
use livefeed_core::EventKind;
use serde::{Deserialize, Serialize};

// ============================================================================
// Outbound (client -> server)
// ============================================================================

/// Control frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Request the given event types.
    Subscribe { event_types: Vec<EventKind> },
    /// Heartbeat.
    Ping,
}

impl OutboundFrame {
    pub fn subscribe(event_types: &[EventKind]) -> Self {
        Self::Subscribe {
            event_types: event_types.to_vec(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Inbound (server -> client)
// ============================================================================

/// Raw envelope before the type tag is validated.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Heartbeat reply.
    Pong,
    /// Server greeting carrying our client id.
    ConnectionEstablished { client_id: Option<String> },
    /// Data update for subscribers.
    Update {
        kind: EventKind,
        data: serde_json::Value,
    },
}

/// Parse and validate a text frame.
///
/// # Errors
/// - `WsError::Json` if the text is not a JSON object with a string `type`
/// - `WsError::ParseError` if an update carries a non-object `data`
/// - `WsError::UnknownEventType` if `type` is not a known control frame or event kind
pub fn parse_frame(text: &str) -> WsResult<InboundFrame> {
    let raw: RawFrame = serde_json::from_str(text)?;

    match raw.frame_type.as_str() {
        "pong" => Ok(InboundFrame::Pong),
        "connection.established" => {
            let client_id = raw
                .data
                .get("client_id")
                .and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
            Ok(InboundFrame::ConnectionEstablished { client_id })
        }
        other => {
            let kind = other
                .parse::<EventKind>()
                .map_err(WsError::UnknownEventType)?;

            match raw.data {
                serde_json::Value::Object(_) | serde_json::Value::Null => Ok(InboundFrame::Update {
                    kind,
                    data: raw.data,
                }),
                _ => Err(WsError::ParseError(format!(
                    "{kind} frame data must be an object"
                ))),
            }
        }
    }
}
