//! WebSocket message types: envelope and commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for requests; server-generated for events.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    pub payload: serde_json::Value,
}

impl WsMessage {
    /// Builds a server message stamped with the current time.
    #[must_use]
    pub fn new(id: String, msg_type: WsMessageType, payload: serde_json::Value) -> Self {
        Self {
            id,
            msg_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Builds an error message.
    #[must_use]
    pub fn error(id: String, code: u16, message: &str) -> Self {
        Self::new(
            id,
            WsMessageType::Error,
            serde_json::json!({ "code": code, "message": message }),
        )
    }
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Client → Server command.
    Command,
    /// Server → Client response to a command.
    Response,
    /// Server → Client broadcast event.
    Event,
    /// Server → Client error.
    Error,
}

/// Commands that a client can send over WebSocket.
///
/// Sent either bare (`{"command":"subscribe","kinds":["auction"]}`) or
/// as the payload of a [`WsMessage`] envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Subscribe to changes of the given record kinds.
    Subscribe {
        /// Record kinds (`auction`, `collection`, `nft`). Use `["*"]` for
        /// all kinds.
        kinds: Vec<String>,
    },
    /// Unsubscribe from changes of the given record kinds.
    Unsubscribe {
        /// Record kinds to drop.
        kinds: Vec<String>,
    },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_command_parses() {
        let Ok(cmd) =
            serde_json::from_str::<WsCommand>(r#"{"command":"subscribe","kinds":["nft","*"]}"#)
        else {
            panic!("command did not parse");
        };
        assert_eq!(
            cmd,
            WsCommand::Subscribe {
                kinds: vec!["nft".to_string(), "*".to_string()],
            }
        );
    }

    #[test]
    fn error_message_carries_code() {
        let msg = WsMessage::error("abc".to_string(), 400, "malformed JSON");
        assert_eq!(msg.msg_type, WsMessageType::Error);
        assert_eq!(msg.payload.get("code"), Some(&serde_json::json!(400)));
    }
}
