//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{EventBus, NameValidation};
use crate::identity::IdentityResolver;
use crate::persistence::EventLog;
use crate::ws::{ConnectionBridge, ConnectionManager, ConnectionSettings};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Event bus for emitting and dispatching events.
    pub event_bus: EventBus,
    /// Live WebSocket connections.
    pub connections: Arc<ConnectionManager>,
    /// Event log backing `GET /api/v1/events`.
    pub event_log: Arc<dyn EventLog>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("event_bus", &self.event_bus)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

/// Inputs for [`AppState::build`].
pub struct StateParts {
    /// Event log exposed over REST.
    pub event_log: Arc<dyn EventLog>,
    /// Whether the bus appends emitted events to `event_log`.
    pub log_events: bool,
    /// Resolves connection credentials.
    pub identity: Arc<dyn IdentityResolver>,
    /// Connection handling settings.
    pub settings: ConnectionSettings,
    /// Per-handler soft deadline.
    pub handler_timeout: Duration,
}

impl std::fmt::Debug for StateParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateParts")
            .field("log_events", &self.log_events)
            .field("settings", &self.settings)
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the bus, the connection manager and the bridge between them.
    ///
    /// The bus gets [`NameValidation`] as its first middleware and delivers
    /// every dispatched event to WebSocket clients.
    pub async fn build(parts: StateParts) -> Self {
        let bus_log = parts.log_events.then(|| Arc::clone(&parts.event_log));
        let event_bus = EventBus::new(parts.handler_timeout, bus_log);
        let connections = Arc::new(ConnectionManager::new(parts.identity, parts.settings));

        event_bus.use_middleware(Arc::new(NameValidation)).await;
        event_bus
            .attach_sink(Arc::new(ConnectionBridge::new(Arc::clone(&connections))))
            .await;

        Self {
            event_bus,
            connections,
            event_log: parts.event_log,
        }
    }
}
