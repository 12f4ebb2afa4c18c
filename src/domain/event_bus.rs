//! Pattern-based publish/subscribe bus for domain events.
//!
//! [`EventBus`] is the single entry point producers use to announce state
//! changes. An emission runs the middleware chain, hands the event to the
//! event log in the background, dispatches it to matching handlers in
//! priority order and finally forwards it to the live-delivery sink.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::RwLock;

use super::middleware::{Middleware, MiddlewareOutcome};
use super::{
    Event, EventDraft, EventHandler, SubscribeOptions, Subscription, SubscriptionId,
    SubscriptionRegistry, UserId, pattern,
};
use crate::error::GatewayError;
use crate::persistence::EventLog;

/// Default soft deadline for a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives every dispatched event for delivery to live connections.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers `event`, returning how many connections received it.
    async fn deliver(&self, event: &Event) -> usize;
}

struct BusInner {
    registry: SubscriptionRegistry,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    event_log: Option<Arc<dyn EventLog>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    handler_timeout: Duration,
}

/// Publish/subscribe bus for [`Event`]s.
///
/// Cheap to clone: all clones share the same subscriptions, middleware,
/// event log and sink. Constructed once at process start and handed to
/// every component that emits or subscribes.
///
/// # Concurrency
///
/// - `emit` may be called concurrently from many producers.
/// - Handlers of one emission run sequentially, in ascending priority and
///   then registration order.
/// - Handlers may subscribe and unsubscribe from inside `handle`.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with the given per-handler soft deadline and optional
    /// event log.
    #[must_use]
    pub fn new(handler_timeout: Duration, event_log: Option<Arc<dyn EventLog>>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: SubscriptionRegistry::new(),
                middleware: RwLock::new(Vec::new()),
                event_log,
                sink: RwLock::new(None),
                handler_timeout,
            }),
        }
    }

    /// Appends a middleware to the chain. Middleware run in registration
    /// order.
    pub async fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        tracing::debug!(middleware = middleware.name(), "middleware registered");
        self.inner.middleware.write().await.push(middleware);
    }

    /// Attaches the live-delivery sink, replacing any previous one.
    pub async fn attach_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write().await = Some(sink);
    }

    /// Registers `handler` for events whose name matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidPattern`] if the pattern is empty or
    /// has an empty segment.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, GatewayError> {
        pattern::validate(pattern).map_err(GatewayError::InvalidPattern)?;
        let handler_name = handler.name().to_string();
        let subscription = Subscription::new(pattern, handler, options);
        let id = self.inner.registry.add(subscription).await;
        tracing::debug!(
            subscription_id = %id,
            pattern,
            handler = %handler_name,
            "subscription added"
        );
        Ok(id)
    }

    /// Removes a subscription. Returns `false` if it was not registered,
    /// including when it was already removed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.registry.remove(id).await;
        if removed {
            tracing::debug!(subscription_id = %id, "subscription removed");
        }
        removed
    }

    /// Pauses (`false`) or resumes (`true`) a subscription. Returns `false`
    /// if it is not registered.
    pub async fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        self.inner.registry.set_active(id, active).await
    }

    /// Number of registered subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Builds and emits an event.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Vetoed`] if a middleware vetoed the event.
    /// Handler, persistence and delivery failures are logged, never
    /// returned.
    pub async fn emit(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
        user_id: Option<UserId>,
        scope: Option<String>,
    ) -> Result<Event, GatewayError> {
        self.emit_draft(EventDraft {
            name: name.into(),
            payload,
            source: source.into(),
            user_id,
            scope,
        })
        .await
    }

    /// Emits an event described by a draft.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Vetoed`] if a middleware vetoed the event.
    pub async fn emit_draft(&self, draft: EventDraft) -> Result<Event, GatewayError> {
        let event = self.run_middleware(Event::from_draft(draft)).await?;

        self.persist(&event);

        let event = self.dispatch(event).await;

        let sink = self.inner.sink.read().await.clone();
        if let Some(sink) = sink {
            let delivered = sink.deliver(&event).await;
            tracing::trace!(event_id = %event.id(), delivered, "event forwarded to connections");
        }

        Ok(event)
    }

    /// Emits each draft in order. A vetoed draft is logged and skipped; the
    /// returned list holds only the events that were dispatched.
    pub async fn emit_batch(&self, drafts: Vec<EventDraft>) -> Vec<Event> {
        let mut emitted = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let name = draft.name.clone();
            match self.emit_draft(draft).await {
                Ok(event) => emitted.push(event),
                Err(err) => tracing::warn!(event_name = %name, error = %err, "batch entry skipped"),
            }
        }
        emitted
    }

    async fn run_middleware(&self, mut event: Event) -> Result<Event, GatewayError> {
        let chain = self.inner.middleware.read().await.clone();
        for middleware in chain {
            match middleware.process(event).await {
                MiddlewareOutcome::Continue(next) => event = next,
                MiddlewareOutcome::Veto(reason) => {
                    tracing::info!(middleware = middleware.name(), %reason, "event vetoed");
                    return Err(GatewayError::Vetoed {
                        middleware: middleware.name().to_string(),
                        reason,
                    });
                }
            }
        }
        Ok(event)
    }

    fn persist(&self, event: &Event) {
        let Some(log) = self.inner.event_log.as_ref().map(Arc::clone) else {
            return;
        };
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(err) = log.append(&event).await {
                tracing::warn!(
                    event_id = %event.id(),
                    event_name = event.name(),
                    error = %err,
                    "failed to persist event"
                );
            }
        });
    }

    async fn dispatch(&self, mut event: Event) -> Event {
        let mut matches = self.inner.registry.find_matching(&event).await;
        matches.sort_by_key(Subscription::dispatch_key);

        let mut spent = Vec::new();
        for subscription in &matches {
            if event.is_propagation_stopped() {
                tracing::debug!(event_id = %event.id(), "propagation stopped");
                break;
            }

            // A once subscription is claimed before it runs so a concurrent
            // emission cannot invoke it a second time.
            let runnable = if subscription.once {
                self.inner.registry.claim(subscription.id).await
            } else {
                self.inner.registry.is_live(subscription.id).await
            };
            if !runnable {
                continue;
            }

            match self.invoke(subscription, &mut event).await {
                Ok(()) if subscription.once => spent.push(subscription.id),
                Ok(()) => {}
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.id(),
                        event_name = event.name(),
                        subscription_id = %subscription.id,
                        handler = subscription.handler.name(),
                        error = %err,
                        "event handler failed"
                    );
                    if subscription.once {
                        self.inner.registry.set_active(subscription.id, true).await;
                    }
                }
            }
        }

        if !spent.is_empty() {
            self.inner.registry.remove_all(&spent).await;
        }
        event
    }

    async fn invoke(
        &self,
        subscription: &Subscription,
        event: &mut Event,
    ) -> Result<(), GatewayError> {
        let handler = subscription.handler.name().to_string();
        let timeout = self.inner.handler_timeout;
        let call = AssertUnwindSafe(subscription.handler.handle(event)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::handler(handler, "handler panicked")),
            Err(_) => Err(GatewayError::HandlerTimeout {
                handler,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_TIMEOUT, None)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_timeout", &self.inner.handler_timeout)
            .field("event_log", &self.inner.event_log.is_some())
            .finish_non_exhaustive()
    }
}
