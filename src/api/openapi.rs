//! OpenAPI document for the REST surface.

use utoipa::OpenApi;

use crate::api::dto::{
    ChannelDto, ChannelListResponse, EmitBatchRequest, EmitBatchResponse, EventHistoryResponse,
    HealthResponse, StatsResponse,
};
use crate::api::handlers::{events, system};
use crate::domain::{Event, EventDraft};
use crate::error::{ErrorBody, ErrorResponse};
use crate::persistence::StoredEvent;
use crate::ws::RegistryStats;

/// Generated OpenAPI document, served at `/api-docs/openapi.json`
/// when the `swagger-ui` feature is enabled.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "relay-gateway", description = "Event bus and WebSocket delivery gateway"),
    paths(
        system::health_handler,
        system::stats_handler,
        system::channels_handler,
        events::emit_event,
        events::emit_batch,
        events::recent_events,
    ),
    components(schemas(
        Event,
        EventDraft,
        StoredEvent,
        EmitBatchRequest,
        EmitBatchResponse,
        EventHistoryResponse,
        HealthResponse,
        StatsResponse,
        RegistryStats,
        ChannelDto,
        ChannelListResponse,
        ErrorResponse,
        ErrorBody,
    )),
    tags(
        (name = "Events", description = "Event emission and history"),
        (name = "System", description = "Health and gateway introspection"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_endpoint() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/stats",
            "/api/v1/channels",
            "/api/v1/events",
            "/api/v1/events/batch",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
