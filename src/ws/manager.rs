//! Connection lifecycle, message routing and delivery.
//!
//! [`ConnectionManager`] drives every connection through
//! `NEW → AUTHENTICATING → AUTHENTICATED → CLOSED`, routes client frames by
//! type, fans messages out to users and channels, and runs the heartbeat
//! sweep. All bookkeeping lives in the [`ConnectionRegistry`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::messages::{MessageType, WsMessage};
use super::registry::{ConnectionRegistry, Outbound, RegistryStats, Target};
use crate::domain::{ConnectionId, UserId};
use crate::error::GatewayError;
use crate::identity::IdentityResolver;

/// Normal closure requested by the client.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Credential rejected.
pub const CLOSE_INVALID_TOKEN: u16 = 4001;
/// No client activity within the heartbeat timeout.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4002;
/// Too many privileged messages before authenticating.
pub const CLOSE_UNAUTHENTICATED_ABUSE: u16 = 4003;

/// Shortest heartbeat period accepted by [`ConnectionManager::spawn_heartbeat`].
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Prefix reserved for per-user channels.
const PERSONAL_CHANNEL_PREFIX: &str = "user:";

/// Tunables for connection handling.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Period of the heartbeat sweep.
    pub heartbeat_interval: Duration,
    /// Idle time after which a connection is force-closed.
    pub idle_timeout: Duration,
    /// Privileged messages tolerated before authentication; one more closes
    /// the connection.
    pub max_unauthenticated_messages: u32,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            max_unauthenticated_messages: 5,
            outbound_capacity: 256,
        }
    }
}

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections force-closed for inactivity.
    pub timed_out: usize,
    /// Connections that were sent a ping.
    pub pinged: usize,
}

/// Owns live connections and delivers messages to them.
pub struct ConnectionManager {
    registry: ConnectionRegistry,
    identity: Arc<dyn IdentityResolver>,
    settings: ConnectionSettings,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager resolving credentials through `identity`.
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityResolver>, settings: ConnectionSettings) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            identity,
            settings,
        }
    }

    /// The underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Connection settings.
    #[must_use]
    pub const fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Aggregate counters.
    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Registers a new connection and queues its welcome frame.
    ///
    /// Returns the connection id and the receiving end of its outbound
    /// queue, which the socket writer drains.
    pub async fn accept(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.settings.outbound_capacity.max(1));
        let id = self.registry.register(tx.clone()).await;
        let _ = tx.try_send(Outbound::Frame(WsMessage::welcome(id)));
        tracing::info!(connection_id = %id, "connection accepted");
        (id, rx)
    }

    /// Handles one text frame received from a connection.
    ///
    /// Never fails: problems are reported to the client as `error` frames.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        let Some(info) = self.registry.touch(id, Instant::now()).await else {
            return;
        };

        let msg = match WsMessage::parse(text) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(connection_id = %id, error = %err, "rejected client frame");
                self.send_error(id, &err, None).await;
                return;
            }
        };

        if !info.is_authenticated() && !msg.msg_type.allowed_before_auth() {
            let attempts = self.registry.record_unauthenticated(id).await.unwrap_or(0);
            self.send_error(id, &GatewayError::NotAuthenticated, msg.id.clone())
                .await;
            if attempts > self.settings.max_unauthenticated_messages {
                tracing::warn!(connection_id = %id, attempts, "closing unauthenticated connection");
                self.close(id, CLOSE_UNAUTHENTICATED_ABUSE, "authentication required")
                    .await;
            }
            return;
        }

        let correlation = msg.id.clone();
        if let Err(err) = self.route(id, info.user_id, msg).await {
            tracing::debug!(connection_id = %id, error = %err, "client request failed");
            self.send_error(id, &err, correlation).await;
        }
    }

    async fn route(
        &self,
        id: ConnectionId,
        user_id: Option<UserId>,
        msg: WsMessage,
    ) -> Result<(), GatewayError> {
        match msg.msg_type {
            MessageType::Ping => {
                let pong = WsMessage::new(MessageType::Pong, serde_json::json!({}))
                    .with_id(msg.id);
                self.send_to(id, pong).await;
                Ok(())
            }
            MessageType::Pong => Ok(()),
            MessageType::Auth => {
                let token = msg
                    .payload
                    .get("token")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        GatewayError::Protocol("auth frame requires payload.token".to_string())
                    })?;
                self.authenticate(id, token).await.map(|_| ())
            }
            MessageType::JoinRoom => {
                let channel = require_channel(&msg)?;
                self.join_channel(id, &channel).await.map(|_| ())
            }
            MessageType::LeaveRoom => {
                let channel = require_channel(&msg)?;
                self.leave_channel(id, &channel).await.map(|_| ())
            }
            MessageType::ChatMessage | MessageType::CursorMove => {
                let user_id = user_id.ok_or(GatewayError::NotAuthenticated)?;
                self.relay(id, &user_id, msg).await
            }
            MessageType::Disconnect => {
                self.close(id, CLOSE_NORMAL, "client disconnect").await;
                Ok(())
            }
            other => Err(GatewayError::Protocol(format!(
                "unsupported message type {other}"
            ))),
        }
    }

    /// Resolves `token` through the identity collaborator and binds the
    /// connection to the resulting user.
    ///
    /// On success the connection joins its personal channel `user:<id>`
    /// and receives `auth_success`. On failure it receives `auth_failed`
    /// and is closed with [`CLOSE_INVALID_TOKEN`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Authentication`] if the token is rejected,
    /// [`GatewayError::Protocol`] if the connection is already
    /// authenticated, and [`GatewayError::ConnectionNotFound`] for unknown
    /// ids.
    pub async fn authenticate(
        &self,
        id: ConnectionId,
        token: &str,
    ) -> Result<UserId, GatewayError> {
        self.registry.begin_authentication(id).await?;

        let user_id = match self.identity.resolve(token).await {
            Ok(user_id) => user_id,
            Err(err) => {
                tracing::warn!(connection_id = %id, error = %err, "authentication failed");
                let failed = WsMessage::new(
                    MessageType::AuthFailed,
                    serde_json::json!({ "message": "invalid token" }),
                );
                self.send_to(id, failed).await;
                self.close(id, CLOSE_INVALID_TOKEN, "invalid token").await;
                return Err(err);
            }
        };

        self.registry.authenticate(id, user_id.clone()).await?;
        let success = WsMessage::new(
            MessageType::AuthSuccess,
            serde_json::json!({
                "user_id": user_id,
                "connection_id": id,
                "channel": user_id.personal_channel(),
            }),
        );
        self.send_to(id, success).await;
        tracing::info!(connection_id = %id, user_id = %user_id, "connection authenticated");
        Ok(user_id)
    }

    /// Adds an authenticated connection to `channel`.
    ///
    /// The joiner receives `subscribed`; the other members receive a
    /// `room_state` update. Returns the member count.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotAuthenticated`] before authentication,
    /// [`GatewayError::Forbidden`] for another user's personal channel and
    /// [`GatewayError::InvalidRequest`] for an empty channel name.
    pub async fn join_channel(
        &self,
        id: ConnectionId,
        channel: &str,
    ) -> Result<usize, GatewayError> {
        if channel.is_empty() {
            return Err(GatewayError::InvalidRequest("channel name is empty".to_string()));
        }
        let info = self
            .registry
            .info(id)
            .await
            .ok_or(GatewayError::ConnectionNotFound(id))?;
        let user_id = info.user_id.ok_or(GatewayError::NotAuthenticated)?;
        if channel.starts_with(PERSONAL_CHANNEL_PREFIX) && channel != user_id.personal_channel() {
            return Err(GatewayError::Forbidden(format!(
                "cannot join another user's channel {channel}"
            )));
        }

        let outcome = self.registry.join(id, channel).await?;
        let confirmation = WsMessage::new(
            MessageType::Subscribed,
            serde_json::json!({ "channel": channel, "members": outcome.members }),
        )
        .with_channel(channel);
        self.send_to(id, confirmation).await;

        if outcome.newly_joined {
            tracing::debug!(connection_id = %id, channel, members = outcome.members, "joined channel");
            self.announce_membership(channel, &user_id, "joined", outcome.members, Some(id))
                .await;
        }
        Ok(outcome.members)
    }

    /// Removes a connection from `channel`. The leaver receives
    /// `unsubscribed`; remaining members receive `room_state`. Returns the
    /// remaining member count.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if the connection is not a
    /// member of the channel.
    pub async fn leave_channel(
        &self,
        id: ConnectionId,
        channel: &str,
    ) -> Result<usize, GatewayError> {
        let user_id = self.registry.info(id).await.and_then(|info| info.user_id);
        let remaining = self.registry.leave(id, channel).await.ok_or_else(|| {
            GatewayError::InvalidRequest(format!("not a member of channel {channel}"))
        })?;

        let confirmation = WsMessage::new(
            MessageType::Unsubscribed,
            serde_json::json!({ "channel": channel }),
        )
        .with_channel(channel);
        self.send_to(id, confirmation).await;

        if let Some(user_id) = user_id {
            self.announce_membership(channel, &user_id, "left", remaining, None)
                .await;
        }
        tracing::debug!(connection_id = %id, channel, remaining, "left channel");
        Ok(remaining)
    }

    async fn relay(
        &self,
        id: ConnectionId,
        user_id: &UserId,
        msg: WsMessage,
    ) -> Result<(), GatewayError> {
        let channel = require_channel(&msg)?;
        if !self.registry.is_member(id, &channel).await {
            return Err(GatewayError::Forbidden(format!(
                "not a member of channel {channel}"
            )));
        }
        let relayed = WsMessage::new(msg.msg_type, msg.payload)
            .with_channel(channel.clone())
            .with_sender(user_id.as_str());
        self.broadcast_to_channel(&channel, relayed, Some(id)).await;
        Ok(())
    }

    async fn announce_membership(
        &self,
        channel: &str,
        user_id: &UserId,
        action: &str,
        members: usize,
        exclude: Option<ConnectionId>,
    ) {
        if members == 0 {
            return;
        }
        let update = WsMessage::new(
            MessageType::RoomState,
            serde_json::json!({
                "channel": channel,
                "members": members,
                "user_id": user_id,
                "action": action,
            }),
        )
        .with_channel(channel);
        self.broadcast_to_channel(channel, update, exclude).await;
    }

    /// Queues `msg` for a single connection. Returns `false` if the
    /// connection is gone or could not take the frame.
    pub async fn send_to(&self, id: ConnectionId, msg: WsMessage) -> bool {
        match self.registry.target(id).await {
            Some(target) => self.deliver(vec![target], &msg).await == 1,
            None => false,
        }
    }

    /// Sends `msg` to every connection of `user_id`. Returns the number of
    /// connections that took it. Connections whose socket is gone are
    /// disconnected.
    pub async fn send_to_user(&self, user_id: &UserId, msg: WsMessage) -> usize {
        let targets = self.registry.user_targets(user_id).await;
        self.deliver(targets, &msg).await
    }

    /// Sends `msg` to every member of `channel` except `exclude`. A missing
    /// or empty channel delivers to nobody.
    pub async fn broadcast_to_channel(
        &self,
        channel: &str,
        msg: WsMessage,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let targets = self.registry.channel_targets(channel, exclude).await;
        self.deliver(targets, &msg).await
    }

    /// Sends `msg` to every connection, or only the authenticated ones.
    pub async fn broadcast_all(&self, msg: WsMessage, authenticated_only: bool) -> usize {
        let targets = self.registry.all_targets(authenticated_only).await;
        self.deliver(targets, &msg).await
    }

    /// Pushes `msg` to each target's queue without waiting on any socket.
    ///
    /// A full queue drops the frame for that connection only; a closed
    /// queue means the writer is gone, so the connection is disconnected.
    async fn deliver(&self, targets: Vec<Target>, msg: &WsMessage) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(Outbound::Frame(msg.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, msg_type = %msg.msg_type, "outbound queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => dead.push(id),
            }
        }
        for id in dead {
            Box::pin(self.disconnect(id, "unreachable")).await;
        }
        delivered
    }

    async fn send_error(&self, id: ConnectionId, err: &GatewayError, correlation: Option<String>) {
        self.send_to(id, WsMessage::error(err).with_id(correlation))
            .await;
    }

    /// Sends a close frame to the connection and disconnects it.
    pub async fn close(&self, id: ConnectionId, code: u16, reason: &str) {
        if let Some((_, sender)) = self.registry.target(id).await {
            let _ = sender.try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
        self.disconnect(id, reason).await;
    }

    /// Removes a connection from every channel and index. Remaining channel
    /// members receive a `room_state` update. Returns `false` if the
    /// connection was already gone.
    pub async fn disconnect(&self, id: ConnectionId, reason: &str) -> bool {
        let Some(info) = self.registry.disconnect(id).await else {
            return false;
        };
        if let Some(user_id) = &info.user_id {
            for channel in &info.channels {
                if channel.starts_with(PERSONAL_CHANNEL_PREFIX) {
                    continue;
                }
                let remaining = self.registry.channel_size(channel).await;
                self.announce_membership(channel, user_id, "left", remaining, None)
                    .await;
            }
        }
        tracing::info!(
            connection_id = %id,
            user_id = ?info.user_id.as_ref().map(UserId::as_str),
            reason,
            "connection closed"
        );
        true
    }

    /// Runs one heartbeat pass at time `now`: connections idle longer than
    /// the timeout are force-closed, every other connection gets a ping.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let (expired, alive) = self
            .registry
            .partition_idle(now, self.settings.idle_timeout)
            .await;

        for id in &expired {
            tracing::warn!(connection_id = %id, "heartbeat timeout");
            self.close(*id, CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout")
                .await;
        }

        let ping = WsMessage::new(MessageType::Ping, serde_json::json!({}));
        let pinged = self.deliver(alive, &ping).await;

        SweepReport {
            timed_out: expired.len(),
            pinged,
        }
    }

    /// Spawns the periodic heartbeat task. Abort the handle to stop it.
    #[must_use]
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = heartbeat_period(self.settings.heartbeat_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let report = manager.sweep(Instant::now()).await;
                tracing::debug!(
                    timed_out = report.timed_out,
                    pinged = report.pinged,
                    "heartbeat sweep"
                );
            }
        })
    }

    /// Closes every connection with [`CLOSE_GOING_AWAY`].
    pub async fn shutdown(&self) -> usize {
        let targets = self.registry.all_targets(false).await;
        let count = targets.len();
        for (id, _) in targets {
            self.close(id, CLOSE_GOING_AWAY, "server shutting down").await;
        }
        count
    }
}

/// Sweep period, never below one second.
fn heartbeat_period(interval: Duration) -> Duration {
    interval.max(MIN_HEARTBEAT_INTERVAL)
}

fn require_channel(msg: &WsMessage) -> Result<String, GatewayError> {
    msg.channel_name()
        .ok_or_else(|| GatewayError::Protocol(format!("{} requires a channel", msg.msg_type)))
}
