//! Domain events flowing through the [`super::EventBus`].
//!
//! An [`Event`] is built by `EventBus::emit`, passed through the middleware
//! chain, offered to every matching handler and finally pushed to live
//! connections. Apart from the propagation flag it is immutable once the
//! middleware chain has run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{EventId, UserId};

/// The producer-supplied part of an event, before the bus stamps it.
///
/// Used by `EventBus::emit_batch` and the REST emission endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventDraft {
    /// Dot-segmented event name (e.g. `"task.created"`).
    pub name: String,
    /// Opaque payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Free-text origin tag (e.g. `"task_service"`).
    #[serde(default)]
    pub source: String,
    /// User the event concerns, if any.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Scope (usually a channel name) the event belongs to, if any.
    #[serde(default)]
    pub scope: Option<String>,
}

impl EventDraft {
    /// Creates a draft with an empty payload and no user or scope.
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
            source: source.into(),
            user_id: None,
            scope: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Targets the event at a user.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Scopes the event to a channel.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

/// A named, timestamped occurrence with an opaque payload.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Event {
    id: EventId,
    name: String,
    payload: serde_json::Value,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(skip)]
    propagation_stopped: bool,
}

impl Event {
    /// Stamps a draft with a fresh id and the current time.
    #[must_use]
    pub fn from_draft(draft: EventDraft) -> Self {
        Self {
            id: EventId::new(),
            name: draft.name,
            payload: draft.payload,
            source: draft.source,
            user_id: draft.user_id,
            scope: draft.scope,
            timestamp: Utc::now(),
            propagation_stopped: false,
        }
    }

    /// Event identifier.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// Dot-segmented event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Origin tag.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Targeted user, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Scope, if any.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Prevents handlers scheduled after the current one from running for
    /// this emission.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// Returns `true` once a handler has called [`Event::stop_propagation`].
    #[must_use]
    pub const fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Returns a copy with a different payload. Intended for middleware.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Returns a copy with a different scope. Intended for middleware.
    #[must_use]
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn draft() -> EventDraft {
        EventDraft::new("order.created", "order_service")
            .with_payload(serde_json::json!({"id": "o1"}))
            .with_user(UserId::new("u1"))
    }

    #[test]
    fn from_draft_keeps_fields() {
        let event = Event::from_draft(draft());
        assert_eq!(event.name(), "order.created");
        assert_eq!(event.source(), "order_service");
        assert_eq!(event.payload()["id"], "o1");
        assert_eq!(event.user_id().map(UserId::as_str), Some("u1"));
        assert!(event.scope().is_none());
        assert!(!event.is_propagation_stopped());
    }

    #[test]
    fn stop_propagation_sets_flag() {
        let mut event = Event::from_draft(draft());
        event.stop_propagation();
        assert!(event.is_propagation_stopped());
    }

    #[test]
    fn serialization_omits_flag_and_empty_scope() {
        let event = Event::from_draft(draft());
        let Ok(json) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert!(json.get("propagation_stopped").is_none());
        assert!(json.get("scope").is_none());
        assert_eq!(json["name"], "order.created");
        assert_eq!(json["user_id"], "u1");
    }

    #[test]
    fn draft_deserializes_with_defaults() {
        let Ok(draft) = serde_json::from_str::<EventDraft>(r#"{"name":"task.created"}"#) else {
            panic!("deserialization failed");
        };
        assert_eq!(draft.name, "task.created");
        assert!(draft.payload.is_null());
        assert!(draft.user_id.is_none());
    }
}
