//! # relay-gateway
//!
//! Real-time event delivery gateway: an in-process pub/sub event bus with
//! dot-segmented, wildcard-aware routing, plus a WebSocket connection
//! manager that authenticates clients, groups them into channels and pushes
//! dispatched events to them.
//!
//! ## Architecture
//!
//! ```text
//! Producers (REST, in-process)          Clients (WebSocket)
//!     │                                     │
//!     ├── REST Handlers (api/)              ├── WS Handler (ws/)
//!     │                                     │
//!     ├── EventBus (domain/)                ├── ConnectionManager (ws/)
//!     │     ├── Middleware chain            │     ├── ConnectionRegistry
//!     │     ├── SubscriptionRegistry        │     └── IdentityResolver (identity/)
//!     │     └── EventLog (persistence/)     │
//!     │                                     │
//!     └────────── ConnectionBridge ─────────┘
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod identity;
pub mod persistence;
pub mod ws;

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the full HTTP application: REST routes, `/ws` and the shared
/// tower middleware stack.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}
