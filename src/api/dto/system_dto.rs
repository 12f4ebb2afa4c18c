//! Health, statistics and channel listing DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::ws::RegistryStats;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"healthy"` when the service answers.
    pub status: String,
    /// Server time, RFC 3339.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
}

/// Response body for `GET /api/v1/stats`.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Connection counters.
    pub connections: RegistryStats,
    /// Number of registered subscriptions on the event bus.
    pub subscriptions: usize,
}

/// One channel and its member count.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChannelDto {
    /// Channel name.
    pub name: String,
    /// Connections currently joined.
    pub members: usize,
}

/// Response body for `GET /api/v1/channels`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChannelListResponse {
    /// Channels sorted by name.
    pub data: Vec<ChannelDto>,
}
