//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection,
//! dispatching subscription commands and forwarding filtered changes.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::{DomainChange, RecordKind};

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and updates its subscriptions.
/// - Forwards matching changes from the [`broadcast::Receiver`] to the client.
pub async fn run_connection(socket: WebSocket, mut change_rx: broadcast::Receiver<DomainChange>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new();

    loop {
        tokio::select! {
            // Incoming message from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_text_message(&text, &mut subs);
                        if let Some(resp_json) = response
                            && ws_tx.send(Message::text(resp_json)).await.is_err() {
                                break;
                            }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            // Committed change from EventBus
            change = change_rx.recv() => {
                match change {
                    Ok(change) => {
                        if subs.matches(change.kind()) {
                            let json = event_json(&change);
                            if ws_tx.send(Message::text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws client lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("ws connection closed");
}

fn event_json(change: &DomainChange) -> String {
    let msg = WsMessage::new(
        uuid::Uuid::new_v4().to_string(),
        WsMessageType::Event,
        serde_json::to_value(change).unwrap_or_default(),
    );
    serde_json::to_string(&msg).unwrap_or_default()
}

/// Handles a text message from the client, returning an optional JSON
/// response.
fn handle_text_message(text: &str, subs: &mut SubscriptionManager) -> Option<String> {
    let (id, payload) = match serde_json::from_str::<WsMessage>(text) {
        Ok(envelope) => (envelope.id, envelope.payload),
        Err(_) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(bare) => (String::new(), bare),
            Err(_) => {
                let err = WsMessage::error(String::new(), 400, "malformed JSON");
                return serde_json::to_string(&err).ok();
            }
        },
    };

    let Ok(command) = serde_json::from_value::<WsCommand>(payload) else {
        return serde_json::to_string(&WsMessage::error(id, 404, "unknown command")).ok();
    };

    let response = match command {
        WsCommand::Subscribe { kinds } => {
            let (parsed, wildcard, unknown) = parse_kinds(&kinds);
            subs.subscribe(&parsed, wildcard);
            serde_json::json!({
                "subscribed": parsed,
                "unknown": unknown,
                "count": subs.count(),
                "wildcard": subs.is_subscribed_all(),
            })
        }
        WsCommand::Unsubscribe { kinds } => {
            let (parsed, wildcard, unknown) = parse_kinds(&kinds);
            subs.unsubscribe(&parsed, wildcard);
            serde_json::json!({
                "unsubscribed": parsed,
                "unknown": unknown,
                "remaining_count": subs.count(),
            })
        }
    };
    serde_json::to_string(&WsMessage::new(id, WsMessageType::Response, response)).ok()
}

/// Splits raw kind strings into known kinds, the wildcard flag, and
/// unrecognized entries.
fn parse_kinds(raw: &[String]) -> (Vec<RecordKind>, bool, Vec<String>) {
    let mut kinds = Vec::new();
    let mut wildcard = false;
    let mut unknown = Vec::new();
    for value in raw {
        if value == "*" {
            wildcard = true;
        } else if let Ok(kind) = value.parse::<RecordKind>() {
            kinds.push(kind);
        } else {
            unknown.push(value.clone());
        }
    }
    (kinds, wildcard, unknown)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn respond(text: &str, subs: &mut SubscriptionManager) -> WsMessage {
        let Some(json) = handle_text_message(text, subs) else {
            panic!("no response");
        };
        let Ok(msg) = serde_json::from_str::<WsMessage>(&json) else {
            panic!("response is not an envelope: {json}");
        };
        msg
    }

    #[test]
    fn bare_subscribe_updates_filter() {
        let mut subs = SubscriptionManager::new();
        let msg = respond(r#"{"command":"subscribe","kinds":["auction","bid"]}"#, &mut subs);
        assert_eq!(msg.msg_type, WsMessageType::Response);
        assert_eq!(
            msg.payload.get("subscribed"),
            Some(&serde_json::json!(["auction"]))
        );
        assert_eq!(msg.payload.get("unknown"), Some(&serde_json::json!(["bid"])));
        assert!(subs.matches(RecordKind::Auction));
        assert!(!subs.matches(RecordKind::Nft));
    }

    #[test]
    fn enveloped_command_echoes_request_id() {
        let mut subs = SubscriptionManager::new();
        let text = serde_json::json!({
            "id": "req-1",
            "type": "command",
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": { "command": "subscribe", "kinds": ["*"] },
        })
        .to_string();
        let msg = respond(&text, &mut subs);
        assert_eq!(msg.id, "req-1");
        assert!(subs.is_subscribed_all());

        let msg = respond(r#"{"command":"unsubscribe","kinds":["*"]}"#, &mut subs);
        assert_eq!(msg.msg_type, WsMessageType::Response);
        assert!(!subs.matches(RecordKind::Collection));
    }

    #[test]
    fn malformed_and_unknown_commands_are_errors() {
        let mut subs = SubscriptionManager::new();
        let msg = respond("not json", &mut subs);
        assert_eq!(msg.msg_type, WsMessageType::Error);
        assert_eq!(msg.payload.get("code"), Some(&serde_json::json!(400)));

        let msg = respond(r#"{"command":"swap"}"#, &mut subs);
        assert_eq!(msg.payload.get("code"), Some(&serde_json::json!(404)));
    }

    #[test]
    fn event_json_wraps_change() {
        let change = DomainChange::AuctionFinalized {
            auction_id: 1,
            on_chain_id: 2,
            timestamp: chrono::Utc::now(),
        };
        let Ok(msg) = serde_json::from_str::<WsMessage>(&event_json(&change)) else {
            panic!("event is not an envelope");
        };
        assert_eq!(msg.msg_type, WsMessageType::Event);
        assert_eq!(
            msg.payload.get("change_type"),
            Some(&serde_json::json!("auction_finalized"))
        );
    }
}
