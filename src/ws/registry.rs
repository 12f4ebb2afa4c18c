//! Live connection registry.
//!
//! [`ConnectionRegistry`] owns three views of the same data: connections by
//! id, connections by user, and channel membership. They sit behind a
//! single [`tokio::sync::Mutex`], and the only operations that mutate
//! membership are `register`, `authenticate`, `join`, `leave` and
//! `disconnect`, so the connection → channels and channel → connections
//! maps cannot drift apart.
//!
//! ```text
//! channel "room:1"          connection c1 { channels: [room:1, user:alice] }
//! ├── c1                    connection c2 { channels: [room:1] }
//! └── c2
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, Instant};
use utoipa::ToSchema;

use super::messages::WsMessage;
use crate::domain::{ConnectionId, UserId};
use crate::error::GatewayError;

/// Frame queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Serialize and send a protocol message.
    Frame(WsMessage),
    /// Send a close frame and stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Handle used to push frames to one connection.
pub type Target = (ConnectionId, mpsc::Sender<Outbound>);

/// Per-connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Socket accepted, no credential presented yet.
    New,
    /// Credential is being resolved.
    Authenticating,
    /// Bound to a user.
    Authenticated,
    /// Removed from the registry.
    Closed,
}

#[derive(Debug)]
struct ConnectionEntry {
    user_id: Option<UserId>,
    state: ConnectionState,
    channels: HashSet<String>,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
    unauthenticated_messages: u32,
    sender: mpsc::Sender<Outbound>,
}

/// Point-in-time copy of a connection's bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Owning user, once authenticated.
    pub user_id: Option<UserId>,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Channels the connection belongs to.
    pub channels: HashSet<String>,
    /// When the socket was accepted.
    pub connected_at: DateTime<Utc>,
    /// Last time anything was received from the client.
    pub last_activity: Instant,
}

impl ConnectionInfo {
    /// Returns `true` once the connection is bound to a user.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    fn from_entry(id: ConnectionId, entry: &ConnectionEntry) -> Self {
        Self {
            id,
            user_id: entry.user_id.clone(),
            state: entry.state,
            channels: entry.channels.clone(),
            connected_at: entry.connected_at,
            last_activity: entry.last_activity,
        }
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Member count after the join.
    pub members: usize,
    /// `false` if the connection was already a member.
    pub newly_joined: bool,
}

/// Aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RegistryStats {
    /// Open connections.
    pub connections: usize,
    /// Authenticated connections.
    pub authenticated: usize,
    /// Distinct users with at least one connection.
    pub users: usize,
    /// Non-empty channels.
    pub channels: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    channels: HashMap<String, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn add_member(&mut self, id: ConnectionId, channel: &str) -> Option<JoinOutcome> {
        let entry = self.connections.get_mut(&id)?;
        let newly_joined = entry.channels.insert(channel.to_string());
        let members = self.channels.entry(channel.to_string()).or_default();
        members.insert(id);
        Some(JoinOutcome {
            members: members.len(),
            newly_joined,
        })
    }

    /// Removes `id` from `channel`, deleting the channel when it empties.
    /// Returns the remaining member count, or `None` if `id` was not a
    /// member.
    fn remove_member(&mut self, id: ConnectionId, channel: &str) -> Option<usize> {
        let entry = self.connections.get_mut(&id)?;
        if !entry.channels.remove(channel) {
            return None;
        }
        let remaining = match self.channels.get_mut(channel) {
            Some(members) => {
                members.remove(&id);
                members.len()
            }
            None => 0,
        };
        if remaining == 0 {
            self.channels.remove(channel);
        }
        Some(remaining)
    }

    fn targets<'a>(&self, ids: impl IntoIterator<Item = &'a ConnectionId>) -> Vec<Target> {
        ids.into_iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|entry| (*id, entry.sender.clone()))
            })
            .collect()
    }
}

/// Registry of live connections, users and channels.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection in state
    /// [`ConnectionState::New`].
    pub async fn register(&self, sender: mpsc::Sender<Outbound>) -> ConnectionId {
        let id = ConnectionId::new();
        let entry = ConnectionEntry {
            user_id: None,
            state: ConnectionState::New,
            channels: HashSet::new(),
            connected_at: Utc::now(),
            last_activity: Instant::now(),
            unauthenticated_messages: 0,
            sender,
        };
        self.state.lock().await.connections.insert(id, entry);
        id
    }

    /// Moves a connection into [`ConnectionState::Authenticating`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionNotFound`] for unknown ids and
    /// [`GatewayError::Protocol`] if the connection is already
    /// authenticated or mid-handshake.
    pub async fn begin_authentication(&self, id: ConnectionId) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let entry = state
            .connections
            .get_mut(&id)
            .ok_or(GatewayError::ConnectionNotFound(id))?;
        match entry.state {
            ConnectionState::New => {
                entry.state = ConnectionState::Authenticating;
                Ok(())
            }
            ConnectionState::Authenticating => Err(GatewayError::Protocol(
                "authentication already in progress".to_string(),
            )),
            ConnectionState::Authenticated | ConnectionState::Closed => {
                Err(GatewayError::Protocol("already authenticated".to_string()))
            }
        }
    }

    /// Binds a connection to `user_id`, indexes it under the user and joins
    /// the user's personal channel, all in one critical section.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionNotFound`] for unknown ids.
    pub async fn authenticate(
        &self,
        id: ConnectionId,
        user_id: UserId,
    ) -> Result<JoinOutcome, GatewayError> {
        let mut state = self.state.lock().await;
        let entry = state
            .connections
            .get_mut(&id)
            .ok_or(GatewayError::ConnectionNotFound(id))?;
        entry.state = ConnectionState::Authenticated;
        entry.user_id = Some(user_id.clone());
        entry.unauthenticated_messages = 0;
        let personal = user_id.personal_channel();
        state.by_user.entry(user_id).or_default().insert(id);
        state
            .add_member(id, &personal)
            .ok_or(GatewayError::ConnectionNotFound(id))
    }

    /// Counts a privileged message received before authentication and
    /// returns the running total, or `None` for unknown ids.
    pub async fn record_unauthenticated(&self, id: ConnectionId) -> Option<u32> {
        let mut state = self.state.lock().await;
        let entry = state.connections.get_mut(&id)?;
        entry.unauthenticated_messages = entry.unauthenticated_messages.saturating_add(1);
        Some(entry.unauthenticated_messages)
    }

    /// Adds a connection to a channel, creating the channel if needed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionNotFound`] for unknown ids.
    pub async fn join(&self, id: ConnectionId, channel: &str) -> Result<JoinOutcome, GatewayError> {
        self.state
            .lock()
            .await
            .add_member(id, channel)
            .ok_or(GatewayError::ConnectionNotFound(id))
    }

    /// Removes a connection from a channel. Returns the remaining member
    /// count, or `None` if the connection was not a member. A channel whose
    /// last member leaves is deleted.
    pub async fn leave(&self, id: ConnectionId, channel: &str) -> Option<usize> {
        self.state.lock().await.remove_member(id, channel)
    }

    /// Removes a connection from every channel, from its user's index and
    /// from the registry. This is the only way a connection is removed.
    ///
    /// Returns the final bookkeeping (state [`ConnectionState::Closed`]), or
    /// `None` if the connection was already gone.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let mut state = self.state.lock().await;
        let channels: Vec<String> = state
            .connections
            .get(&id)?
            .channels
            .iter()
            .cloned()
            .collect();
        for channel in &channels {
            state.remove_member(id, channel);
        }

        let entry = state.connections.remove(&id)?;
        if let Some(user_id) = &entry.user_id
            && let Some(ids) = state.by_user.get_mut(user_id)
        {
            ids.remove(&id);
            if ids.is_empty() {
                state.by_user.remove(user_id);
            }
        }

        let mut info = ConnectionInfo::from_entry(id, &entry);
        info.state = ConnectionState::Closed;
        info.channels = channels.into_iter().collect();
        Some(info)
    }

    /// Records client activity and returns the updated bookkeeping.
    pub async fn touch(&self, id: ConnectionId, now: Instant) -> Option<ConnectionInfo> {
        let mut state = self.state.lock().await;
        let entry = state.connections.get_mut(&id)?;
        entry.last_activity = now;
        Some(ConnectionInfo::from_entry(id, entry))
    }

    /// Returns a copy of a connection's bookkeeping.
    pub async fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.state
            .lock()
            .await
            .connections
            .get(&id)
            .map(|entry| ConnectionInfo::from_entry(id, entry))
    }

    /// Returns `true` if the connection is a member of `channel`.
    pub async fn is_member(&self, id: ConnectionId, channel: &str) -> bool {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .is_some_and(|members| members.contains(&id))
    }

    /// Delivery handle for one connection.
    pub async fn target(&self, id: ConnectionId) -> Option<Target> {
        self.state
            .lock()
            .await
            .connections
            .get(&id)
            .map(|entry| (id, entry.sender.clone()))
    }

    /// Delivery handles for every connection of `user_id`.
    pub async fn user_targets(&self, user_id: &UserId) -> Vec<Target> {
        let state = self.state.lock().await;
        match state.by_user.get(user_id) {
            Some(ids) => state.targets(ids),
            None => Vec::new(),
        }
    }

    /// Delivery handles for every member of `channel` except `exclude`.
    pub async fn channel_targets(
        &self,
        channel: &str,
        exclude: Option<ConnectionId>,
    ) -> Vec<Target> {
        let state = self.state.lock().await;
        match state.channels.get(channel) {
            Some(ids) => state.targets(ids.iter().filter(|id| Some(**id) != exclude)),
            None => Vec::new(),
        }
    }

    /// Delivery handles for every connection, optionally only the
    /// authenticated ones.
    pub async fn all_targets(&self, authenticated_only: bool) -> Vec<Target> {
        self.state
            .lock()
            .await
            .connections
            .iter()
            .filter(|(_, entry)| {
                !authenticated_only || entry.state == ConnectionState::Authenticated
            })
            .map(|(id, entry)| (*id, entry.sender.clone()))
            .collect()
    }

    /// Splits connections into those idle for longer than `timeout` (ids
    /// only) and the rest (delivery handles).
    pub async fn partition_idle(
        &self,
        now: Instant,
        timeout: Duration,
    ) -> (Vec<ConnectionId>, Vec<Target>) {
        let state = self.state.lock().await;
        let mut expired = Vec::new();
        let mut alive = Vec::new();
        for (id, entry) in &state.connections {
            if now.saturating_duration_since(entry.last_activity) > timeout {
                expired.push(*id);
            } else {
                alive.push((*id, entry.sender.clone()));
            }
        }
        (expired, alive)
    }

    /// Number of members of `channel` (0 if it does not exist).
    pub async fn channel_size(&self, channel: &str) -> usize {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .map_or(0, HashSet::len)
    }

    /// Returns `true` if the channel currently has members.
    pub async fn has_channel(&self, channel: &str) -> bool {
        self.state.lock().await.channels.contains_key(channel)
    }

    /// Every non-empty channel with its member count, sorted by name.
    pub async fn channels(&self) -> Vec<(String, usize)> {
        let state = self.state.lock().await;
        let mut channels: Vec<(String, usize)> = state
            .channels
            .iter()
            .map(|(name, members)| (name.clone(), members.len()))
            .collect();
        channels.sort();
        channels
    }

    /// Number of connections owned by `user_id`.
    pub async fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.state
            .lock()
            .await
            .by_user
            .get(user_id)
            .map_or(0, HashSet::len)
    }

    /// Aggregate counters.
    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.lock().await;
        RegistryStats {
            connections: state.connections.len(),
            authenticated: state
                .connections
                .values()
                .filter(|entry| entry.state == ConnectionState::Authenticated)
                .count(),
            users: state.by_user.len(),
            channels: state.channels.len(),
        }
    }
}
