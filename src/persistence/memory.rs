//! Bounded in-memory event log.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{EventLog, StoredEvent};
use crate::domain::Event;
use crate::error::GatewayError;

/// Default number of events retained.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct LogState {
    rows: VecDeque<StoredEvent>,
    next_id: i64,
}

/// Event log kept in process memory.
///
/// Holds at most `capacity` events; the oldest are dropped first. Used when
/// no database is configured and in tests.
#[derive(Debug)]
pub struct InMemoryEventLog {
    state: Mutex<LogState>,
    capacity: usize,
}

impl InMemoryEventLog {
    /// Creates a log with [`DEFAULT_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a log retaining at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of retained events.
    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    /// Returns `true` if no events are retained.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.rows.is_empty()
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: &Event) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.saturating_add(1);
        let row = StoredEvent::from_event(state.next_id, event);
        if state.rows.len() >= self.capacity {
            state.rows.pop_front();
        }
        state.rows.push_back(row);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, GatewayError> {
        let state = self.state.lock().await;
        Ok(state.rows.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventDraft, UserId};

    fn event(name: &str) -> Event {
        Event::from_draft(EventDraft::new(name, "test").with_user(UserId::new("u1")))
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let log = InMemoryEventLog::new();
        assert!(log.append(&event("a.one")).await.is_ok());
        assert!(log.append(&event("a.two")).await.is_ok());

        let Ok(rows) = log.recent(10).await else {
            panic!("recent failed");
        };
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(rows.first().map(|r| r.name.as_str()), Some("a.two"));
        assert_eq!(rows.first().and_then(|r| r.user_id.as_deref()), Some("u1"));
    }

    #[tokio::test]
    async fn capacity_drops_oldest() {
        let log = InMemoryEventLog::with_capacity(2);
        for name in ["a.one", "a.two", "a.three"] {
            let _ = log.append(&event(name)).await;
        }
        assert_eq!(log.len().await, 2);
        let Ok(rows) = log.recent(10).await else {
            panic!("recent failed");
        };
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a.three", "a.two"]);
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let log = InMemoryEventLog::new();
        for name in ["a.one", "a.two", "a.three"] {
            let _ = log.append(&event(name)).await;
        }
        let Ok(rows) = log.recent(1).await else {
            panic!("recent failed");
        };
        assert_eq!(rows.len(), 1);
        assert!(!log.is_empty().await);
    }
}
