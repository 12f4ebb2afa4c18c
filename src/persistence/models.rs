//! Stored event rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::Event;

/// A stored event row from the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredEvent {
    /// Auto-increment row ID.
    pub id: i64,
    /// Identifier assigned by the bus at emission time.
    pub event_id: Uuid,
    /// Dot-segmented event name.
    pub name: String,
    /// JSONB payload.
    pub payload: serde_json::Value,
    /// Origin tag.
    pub source: String,
    /// Targeted user, if any.
    pub user_id: Option<String>,
    /// Scope, if any.
    pub scope: Option<String>,
    /// Emission timestamp.
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds a row for `event` with the given row ID.
    #[must_use]
    pub fn from_event(id: i64, event: &Event) -> Self {
        Self {
            id,
            event_id: *event.id().as_uuid(),
            name: event.name().to_string(),
            payload: event.payload().clone(),
            source: event.source().to_string(),
            user_id: event.user_id().map(ToString::to_string),
            scope: event.scope().map(str::to_string),
            created_at: event.timestamp(),
        }
    }
}
