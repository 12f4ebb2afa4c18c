//! Event emission and history DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Event, EventDraft};
use crate::persistence::StoredEvent;

/// Request body for `POST /api/v1/events/batch`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EmitBatchRequest {
    /// Events to emit, in order.
    pub events: Vec<EventDraft>,
}

/// Response body for `POST /api/v1/events/batch`.
#[derive(Debug, Serialize, ToSchema)]
pub struct EmitBatchResponse {
    /// Number of drafts submitted.
    pub submitted: usize,
    /// Number of drafts dispatched (the rest were vetoed).
    pub emitted: usize,
    /// The dispatched events, in emission order.
    pub events: Vec<Event>,
}

/// Response body for `GET /api/v1/events`.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventHistoryResponse {
    /// Stored events, newest first.
    pub data: Vec<StoredEvent>,
    /// Number of events returned.
    pub count: usize,
}
