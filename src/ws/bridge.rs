//! Bridge from the event bus to connected clients.

use std::sync::Arc;

use async_trait::async_trait;

use super::manager::ConnectionManager;
use super::messages::WsMessage;
use crate::domain::{Event, EventSink};

/// Forwards dispatched events to WebSocket connections.
///
/// Routing: an event carrying a `user_id` goes to that user's connections;
/// otherwise a scoped event goes to the channel named by its scope;
/// anything else goes to every authenticated connection.
#[derive(Debug, Clone)]
pub struct ConnectionBridge {
    manager: Arc<ConnectionManager>,
}

impl ConnectionBridge {
    /// Creates a bridge delivering through `manager`.
    #[must_use]
    pub const fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventSink for ConnectionBridge {
    async fn deliver(&self, event: &Event) -> usize {
        let msg = WsMessage::from_event(event);
        let delivered = if let Some(user_id) = event.user_id() {
            self.manager.send_to_user(user_id, msg).await
        } else if let Some(scope) = event.scope() {
            self.manager.broadcast_to_channel(scope, msg, None).await
        } else {
            self.manager.broadcast_all(msg, true).await
        };
        tracing::trace!(event = event.name(), delivered, "event delivered to clients");
        delivered
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventDraft, UserId};
    use crate::identity::StaticTokenResolver;
    use crate::ws::manager::ConnectionSettings;
    use crate::ws::registry::Outbound;
    use tokio::sync::mpsc;

    async fn setup() -> (
        Arc<ConnectionManager>,
        mpsc::Receiver<Outbound>,
        mpsc::Receiver<Outbound>,
    ) {
        let identity = StaticTokenResolver::parse("a=alice,b=bob");
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(identity),
            ConnectionSettings::default(),
        ));
        let (a, mut ra) = manager.accept().await;
        let (b, mut rb) = manager.accept().await;
        if manager.authenticate(a, "a").await.is_err() || manager.authenticate(b, "b").await.is_err() {
            panic!("authentication should succeed");
        }
        let _ = manager.join_channel(a, "project:1").await;
        while ra.try_recv().is_ok() {}
        while rb.try_recv().is_ok() {}
        (manager, ra, rb)
    }

    #[tokio::test]
    async fn user_events_reach_only_that_user() {
        let (manager, mut ra, mut rb) = setup().await;
        let bridge = ConnectionBridge::new(manager);
        let event = Event::from_draft(
            EventDraft::new("notification.mention", "chat").with_user(UserId::new("bob")),
        );
        assert_eq!(bridge.deliver(&event).await, 1);
        assert!(ra.try_recv().is_err());
        assert!(matches!(rb.try_recv(), Ok(Outbound::Frame(_))));
    }

    #[tokio::test]
    async fn scoped_events_reach_channel_members() {
        let (manager, mut ra, mut rb) = setup().await;
        let bridge = ConnectionBridge::new(manager);
        let event = Event::from_draft(EventDraft::new("task.created", "tasks").with_scope("project:1"));
        assert_eq!(bridge.deliver(&event).await, 1);
        let Ok(Outbound::Frame(msg)) = ra.try_recv() else {
            panic!("member should receive the event");
        };
        assert_eq!(msg.channel.as_deref(), Some("project:1"));
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn unrouted_events_reach_every_authenticated_connection() {
        let (manager, _ra, _rb) = setup().await;
        let (_anon, _rn) = manager.accept().await;
        let bridge = ConnectionBridge::new(manager);
        let event = Event::from_draft(EventDraft::new("system.maintenance", "ops"));
        assert_eq!(bridge.deliver(&event).await, 2);
    }
}
