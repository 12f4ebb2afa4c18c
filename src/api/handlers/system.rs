//! System endpoints: health check, gateway statistics, channel listing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{ChannelDto, ChannelListResponse, HealthResponse, StatsResponse};
use crate::app_state::AppState;

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /stats`: Connection and subscription counters.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "System",
    summary = "Gateway statistics",
    description = "Returns live connection, user and channel counts plus the number of bus subscriptions.",
    responses(
        (status = 200, description = "Current counters", body = StatsResponse),
    )
)]
pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        connections: state.connections.stats().await,
        subscriptions: state.event_bus.subscription_count().await,
    })
}

/// `GET /channels`: Channels with at least one member.
#[utoipa::path(
    get,
    path = "/api/v1/channels",
    tag = "System",
    summary = "List channels",
    description = "Returns every non-empty channel and its member count, sorted by name.",
    responses(
        (status = 200, description = "Channel list", body = ChannelListResponse),
    )
)]
pub async fn channels_handler(State(state): State<AppState>) -> impl IntoResponse {
    let data = state
        .connections
        .registry()
        .channels()
        .await
        .into_iter()
        .map(|(name, members)| ChannelDto { name, members })
        .collect();
    Json(ChannelListResponse { data })
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}

/// System routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats_handler))
        .route("/channels", get(channels_handler))
}
