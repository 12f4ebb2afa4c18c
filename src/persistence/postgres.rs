//! PostgreSQL implementation of the event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::{EventLog, StoredEvent};
use crate::domain::Event;
use crate::error::GatewayError;

const CREATE_EVENTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS events (\
     id BIGSERIAL PRIMARY KEY, \
     event_id UUID NOT NULL UNIQUE, \
     name TEXT NOT NULL, \
     payload JSONB NOT NULL, \
     source TEXT NOT NULL, \
     user_id TEXT, \
     scope TEXT, \
     created_at TIMESTAMPTZ NOT NULL DEFAULT now())";

const CREATE_EVENTS_NAME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS events_name_created_at_idx ON events (name, created_at)";

type EventRow = (
    i64,
    Uuid,
    String,
    serde_json::Value,
    String,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

/// PostgreSQL-backed event log using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates an event log over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and makes sure the `events` table exists.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::PersistenceError`] if the database is
    /// unreachable or the schema cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        let log = Self::new(pool);
        log.ensure_schema().await?;
        Ok(log)
    }

    /// Creates the `events` table and its index if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::PersistenceError`] on database failure.
    pub async fn ensure_schema(&self) -> Result<(), GatewayError> {
        for statement in [CREATE_EVENTS_TABLE, CREATE_EVENTS_NAME_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    async fn append(&self, event: &Event) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO events (event_id, name, payload, source, user_id, scope, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*event.id().as_uuid())
        .bind(event.name())
        .bind(event.payload())
        .bind(event.source())
        .bind(event.user_id().map(|u| u.as_str().to_string()))
        .bind(event.scope())
        .bind(event.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, GatewayError> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, event_id, name, payload, source, user_id, scope, created_at FROM events \
             ORDER BY id DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        Ok(rows.into_iter().map(into_stored).collect())
    }
}

fn into_stored(
    (id, event_id, name, payload, source, user_id, scope, created_at): EventRow,
) -> StoredEvent {
    StoredEvent {
        id,
        event_id,
        name,
        payload,
        source,
        user_id,
        scope,
        created_at,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn schema_statements_are_idempotent() {
        for statement in [CREATE_EVENTS_TABLE, CREATE_EVENTS_NAME_INDEX] {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }

    #[tokio::test]
    async fn serves_as_the_event_log() {
        let Ok(pool) = PgPoolOptions::new().connect_lazy("postgres://relay@localhost/relay") else {
            panic!("lazy pool should build without connecting");
        };
        let log: Arc<dyn EventLog> = Arc::new(PostgresEventLog::new(pool));
        drop(log);
    }
}
