//! Persistence layer: the event log collaborator.
//!
//! `EventBus::emit` appends every dispatched event to an [`EventLog`] in
//! the background. Failures are logged by the bus and never reach the
//! producer. Two implementations are provided: an in-memory ring used in
//! tests and when no database is configured, and a PostgreSQL log built on
//! `sqlx::PgPool`.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

pub use memory::InMemoryEventLog;
pub use models::StoredEvent;
pub use postgres::PostgresEventLog;

use crate::domain::Event;
use crate::error::GatewayError;

/// Append-only store of emitted events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the store rejects the
    /// write.
    async fn append(&self, event: &Event) -> Result<(), GatewayError>;

    /// Returns up to `limit` of the most recently stored events, newest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the store cannot be
    /// read.
    async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, GatewayError>;
}
