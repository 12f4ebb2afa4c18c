//! Domain layer: events, subscriptions and the event bus.
//!
//! This module contains the in-process half of the real-time core: the
//! identifiers and [`Event`] type, the pattern matcher, subscription
//! storage, the middleware chain and the [`EventBus`] that ties them
//! together.

pub mod event;
pub mod event_bus;
pub mod ids;
pub mod middleware;
pub mod pattern;
pub mod subscription;
pub mod subscription_registry;

pub use event::{Event, EventDraft};
pub use event_bus::{EventBus, EventSink};
pub use ids::{ConnectionId, EventId, SubscriptionId, UserId};
pub use middleware::{Middleware, MiddlewareOutcome, NameValidation, ScopeDefault};
pub use subscription::{EventHandler, FnHandler, Priority, SubscribeOptions, Subscription};
pub use subscription_registry::SubscriptionRegistry;
