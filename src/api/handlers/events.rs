//! Event handlers: emit, emit batch, recent history.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{EmitBatchRequest, EmitBatchResponse, EventHistoryResponse, LimitParams};
use crate::app_state::AppState;
use crate::domain::{Event, EventDraft};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /events`: Emit a single event.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for an empty name and
/// [`GatewayError::Vetoed`] if a middleware rejected the event.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Emit an event",
    description = "Runs the event through middleware, dispatches it to matching subscriptions and forwards it to connected clients. `user_id` routes to that user's connections, otherwise `scope` routes to the channel of the same name.",
    request_body = EventDraft,
    responses(
        (status = 201, description = "Event dispatched", body = Event),
        (status = 400, description = "Invalid event", body = ErrorResponse),
        (status = 409, description = "Vetoed by middleware", body = ErrorResponse),
    )
)]
pub async fn emit_event(
    State(state): State<AppState>,
    Json(draft): Json<EventDraft>,
) -> Result<impl IntoResponse, GatewayError> {
    validate_draft(&draft)?;
    let event = state.event_bus.emit_draft(draft).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// `POST /events/batch`: Emit several events in order.
///
/// Vetoed entries are skipped; the response lists only dispatched events.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] if any entry has an empty name.
#[utoipa::path(
    post,
    path = "/api/v1/events/batch",
    tag = "Events",
    summary = "Emit a batch of events",
    description = "Emits each event in order. Entries vetoed by middleware are skipped and omitted from the response.",
    request_body = EmitBatchRequest,
    responses(
        (status = 200, description = "Batch processed", body = EmitBatchResponse),
        (status = 400, description = "Invalid event in batch", body = ErrorResponse),
    )
)]
pub async fn emit_batch(
    State(state): State<AppState>,
    Json(req): Json<EmitBatchRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    for draft in &req.events {
        validate_draft(draft)?;
    }
    let submitted = req.events.len();
    let events = state.event_bus.emit_batch(req.events).await;
    Ok(Json(EmitBatchResponse {
        submitted,
        emitted: events.len(),
        events,
    }))
}

/// `GET /events`: Most recent logged events, newest first.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] if the log cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Recent events",
    description = "Returns the most recently logged events, newest first.",
    params(LimitParams),
    responses(
        (status = 200, description = "Recent events", body = EventHistoryResponse),
        (status = 500, description = "Event log unavailable", body = ErrorResponse),
    )
)]
pub async fn recent_events(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let data = state.event_log.recent(params.clamped()).await?;
    Ok(Json(EventHistoryResponse {
        count: data.len(),
        data,
    }))
}

fn validate_draft(draft: &EventDraft) -> Result<(), GatewayError> {
    if draft.name.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "event name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Event routes (mounted under `/api/v1`).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(emit_event).get(recent_events))
        .route("/events/batch", post(emit_batch))
}
