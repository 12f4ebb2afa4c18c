//! Subscriptions: a pattern bound to a handler.
//!
//! Handlers are registered explicitly through `EventBus::subscribe`, each
//! with its own [`Priority`] and optional scope/user filters.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Event, SubscriptionId, UserId};
use crate::error::GatewayError;

/// Dispatch priority. Lower numeric value runs earlier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Runs before everything else (validation, auditing).
    Highest = 0,
    /// Runs before normal handlers.
    High = 1,
    /// Default priority.
    #[default]
    Normal = 2,
    /// Runs after normal handlers.
    Low = 3,
    /// Runs last (analytics, fan-out).
    Lowest = 4,
}

/// Receives events from the bus.
///
/// A handler may call [`Event::stop_propagation`] to prevent handlers
/// scheduled after it from running for the current emission. Errors are
/// logged by the bus and never abort the emission.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes one event.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] describing the failure; the bus logs it
    /// and moves on to the next handler.
    async fn handle(&self, event: &mut Event) -> Result<(), GatewayError>;

    /// Handler name used in logs and error reports.
    fn name(&self) -> &str;
}

/// Adapts a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&mut Event) -> Result<(), GatewayError> + Send + Sync,
{
    /// Wraps `f` under the given handler name.
    #[must_use]
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Wraps `f` and returns it ready for `EventBus::subscribe`.
    #[must_use]
    pub fn shared(name: impl Into<String>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&mut Event) -> Result<(), GatewayError> + Send + Sync,
{
    async fn handle(&self, event: &mut Event) -> Result<(), GatewayError> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Optional parameters of `EventBus::subscribe`.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Dispatch priority (defaults to [`Priority::Normal`]).
    pub priority: Priority,
    /// Only events with exactly this scope are delivered.
    pub scope: Option<String>,
    /// Only events targeted at this user are delivered.
    pub user_id: Option<UserId>,
    /// Remove the subscription after its first successful invocation.
    pub once: bool,
}

impl SubscribeOptions {
    /// Options with the given priority.
    #[must_use]
    pub fn priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// One-shot options with default priority.
    #[must_use]
    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::default()
        }
    }

    /// Restricts delivery to the given scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Restricts delivery to events targeted at the given user.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// A standing registration of interest in events matching a pattern.
///
/// Cloning is cheap: the handler is shared.
#[derive(Clone)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Dot-segmented pattern, possibly with `*` segments.
    pub pattern: String,
    /// Handler invoked for matching events.
    pub handler: Arc<dyn EventHandler>,
    /// Dispatch priority.
    pub priority: Priority,
    /// Scope filter.
    pub scope: Option<String>,
    /// User filter.
    pub user_id: Option<UserId>,
    /// One-shot flag.
    pub once: bool,
    /// Inactive subscriptions are skipped during matching.
    pub active: bool,
    /// Registration order, used to break priority ties.
    pub sequence: u64,
}

impl Subscription {
    /// Builds an active subscription with a fresh id. The registry assigns
    /// the sequence number on insertion.
    #[must_use]
    pub fn new(
        pattern: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            pattern: pattern.into(),
            handler,
            priority: options.priority,
            scope: options.scope,
            user_id: options.user_id,
            once: options.once,
            active: true,
            sequence: 0,
        }
    }

    /// Returns `true` if the scope and user filters accept `event`.
    #[must_use]
    pub fn accepts(&self, event: &Event) -> bool {
        if let Some(scope) = &self.scope
            && event.scope() != Some(scope.as_str())
        {
            return false;
        }
        if let Some(user_id) = &self.user_id
            && event.user_id() != Some(user_id)
        {
            return false;
        }
        true
    }

    /// Sort key for dispatch: priority first, then registration order.
    #[must_use]
    pub const fn dispatch_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("handler", &self.handler.name())
            .field("priority", &self.priority)
            .field("scope", &self.scope)
            .field("user_id", &self.user_id)
            .field("once", &self.once)
            .field("active", &self.active)
            .finish()
    }
}
