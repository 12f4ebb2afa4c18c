//! WebSocket message types: the JSON envelope and its type vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionId, Event};
use crate::error::GatewayError;

/// Top-level WebSocket message envelope.
///
/// ```json
/// {"type": "join_room", "room": "project:7", "payload": {}, "timestamp": "..."}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided correlation ID, echoed on replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Variant-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Target channel. Clients may also call it `room`.
    #[serde(default, alias = "room", skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Originating user for relayed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// ISO-8601 timestamp. Filled in by the server when a client omits it.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Server → Client: connection accepted.
    Connect,
    /// Client → Server: close this connection.
    Disconnect,
    /// Liveness probe, either direction.
    Ping,
    /// Liveness reply, either direction.
    Pong,
    /// Client → Server: present a bearer token.
    Auth,
    /// Server → Client: token accepted.
    AuthSuccess,
    /// Server → Client: token rejected; the connection is closed next.
    AuthFailed,
    /// Client → Server: join a channel.
    #[serde(alias = "subscribe")]
    JoinRoom,
    /// Client → Server: leave a channel.
    #[serde(alias = "unsubscribe")]
    LeaveRoom,
    /// Server → Client: membership of a channel changed.
    RoomState,
    /// Server → Client: join confirmed.
    Subscribed,
    /// Server → Client: leave confirmed.
    Unsubscribed,
    /// Chat line relayed to the other members of a channel.
    ChatMessage,
    /// Cursor position relayed to the other members of a channel.
    CursorMove,
    /// Server → Client: domain event.
    Event,
    /// Server → Client: user-facing notification.
    Notification,
    /// Server → Client: greeting sent right after the socket opens.
    Welcome,
    /// Server → Client: error.
    Error,
}

impl MessageType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Auth => "auth",
            Self::AuthSuccess => "auth_success",
            Self::AuthFailed => "auth_failed",
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::RoomState => "room_state",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::ChatMessage => "chat_message",
            Self::CursorMove => "cursor_move",
            Self::Event => "event",
            Self::Notification => "notification",
            Self::Welcome => "welcome",
            Self::Error => "error",
        }
    }

    /// Types a connection may send before it has authenticated.
    #[must_use]
    pub const fn allowed_before_auth(self) -> bool {
        matches!(self, Self::Auth | Self::Ping | Self::Pong)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WsMessage {
    /// Builds a server message stamped with the current time.
    #[must_use]
    pub fn new(msg_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            msg_type,
            payload,
            channel: None,
            sender: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the channel.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Sets the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Sets the correlation ID.
    #[must_use]
    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    /// Parses a client text frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] if the text is not JSON or the
    /// envelope is invalid (e.g. unknown `type`).
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(|e| {
            if e.is_syntax() || e.is_eof() {
                GatewayError::Protocol("malformed JSON".to_string())
            } else {
                GatewayError::Protocol(e.to_string())
            }
        })
    }

    /// Channel named by the envelope, or by `payload.channel` /
    /// `payload.room` when the envelope field is absent.
    #[must_use]
    pub fn channel_name(&self) -> Option<String> {
        self.channel
            .clone()
            .or_else(|| {
                ["channel", "room"]
                    .iter()
                    .find_map(|key| self.payload.get(*key).and_then(|v| v.as_str()))
                    .map(str::to_string)
            })
            .filter(|c| !c.is_empty())
    }

    /// Greeting sent when a socket is accepted.
    #[must_use]
    pub fn welcome(connection_id: ConnectionId) -> Self {
        Self::new(
            MessageType::Welcome,
            serde_json::json!({
                "connection_id": connection_id,
                "requires_auth": true,
            }),
        )
    }

    /// Error frame for `err`.
    #[must_use]
    pub fn error(err: &GatewayError) -> Self {
        Self::new(
            MessageType::Error,
            serde_json::json!({
                "code": err.wire_code(),
                "message": err.to_string(),
            }),
        )
    }

    /// Outbound frame for a dispatched domain event.
    ///
    /// Events named `notification.*` are sent as `notification` frames,
    /// everything else as `event`.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        let msg_type = if event.name().starts_with("notification.") {
            MessageType::Notification
        } else {
            MessageType::Event
        };
        let mut msg = Self::new(
            msg_type,
            serde_json::json!({
                "id": event.id(),
                "name": event.name(),
                "data": event.payload(),
                "source": event.source(),
                "scope": event.scope(),
                "timestamp": event.timestamp(),
            }),
        );
        msg.channel = event.scope().map(str::to_string);
        msg
    }

    /// Serializes to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if serialization fails.
    pub fn to_json(&self) -> Result<String, GatewayError> {
        serde_json::to_string(self).map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::EventDraft;

    #[test]
    fn parses_room_alias_and_subscribe_alias() {
        let Ok(msg) = WsMessage::parse(r#"{"type":"subscribe","room":"room:1"}"#) else {
            panic!("should parse");
        };
        assert_eq!(msg.msg_type, MessageType::JoinRoom);
        assert_eq!(msg.channel_name().as_deref(), Some("room:1"));
    }

    #[test]
    fn channel_falls_back_to_payload() {
        let Ok(msg) = WsMessage::parse(r#"{"type":"leave_room","payload":{"channel":"c1"}}"#)
        else {
            panic!("should parse");
        };
        assert_eq!(msg.msg_type, MessageType::LeaveRoom);
        assert_eq!(msg.channel_name().as_deref(), Some("c1"));
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let result = WsMessage::parse("{not json");
        let Err(GatewayError::Protocol(message)) = result else {
            panic!("expected protocol error");
        };
        assert_eq!(message, "malformed JSON");
    }

    #[test]
    fn unknown_type_is_a_protocol_error() {
        let result = WsMessage::parse(r#"{"type":"teleport"}"#);
        assert!(matches!(result, Err(GatewayError::Protocol(_))));
    }

    #[test]
    fn serializes_type_in_snake_case_and_skips_empty_fields() {
        let msg = WsMessage::new(MessageType::AuthSuccess, serde_json::json!({}));
        let Ok(json) = msg.to_json() else {
            panic!("serialization failed");
        };
        assert!(json.contains(r#""type":"auth_success""#));
        assert!(!json.contains("channel"));
        assert!(!json.contains("sender"));
    }

    #[test]
    fn event_frames_carry_scope_as_channel() {
        let event = Event::from_draft(
            EventDraft::new("task.created", "tasks")
                .with_scope("project:1")
                .with_payload(serde_json::json!({"id": "t1"})),
        );
        let msg = WsMessage::from_event(&event);
        assert_eq!(msg.msg_type, MessageType::Event);
        assert_eq!(msg.channel.as_deref(), Some("project:1"));
        assert_eq!(msg.payload["name"], "task.created");
        assert_eq!(msg.payload["data"]["id"], "t1");
    }

    #[test]
    fn notification_events_use_notification_type() {
        let event = Event::from_draft(EventDraft::new("notification.mention", "chat"));
        assert_eq!(WsMessage::from_event(&event).msg_type, MessageType::Notification);
    }

    #[test]
    fn only_auth_and_liveness_allowed_before_auth() {
        assert!(MessageType::Auth.allowed_before_auth());
        assert!(MessageType::Ping.allowed_before_auth());
        assert!(!MessageType::JoinRoom.allowed_before_auth());
        assert!(!MessageType::ChatMessage.allowed_before_auth());
    }
}
