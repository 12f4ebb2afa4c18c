//! Middleware chain run by `EventBus::emit` before dispatch.
//!
//! Each middleware sees the event produced by the previous one and either
//! passes a (possibly modified) event along or vetoes the emission.

use async_trait::async_trait;

use super::Event;
use super::pattern::WILDCARD;

/// Result of running one middleware.
#[derive(Debug)]
pub enum MiddlewareOutcome {
    /// Continue with this event.
    Continue(Event),
    /// Abort the emission: no persistence, no dispatch, no live delivery.
    Veto(String),
}

/// A step in the emission pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Inspects or transforms `event`.
    async fn process(&self, event: Event) -> MiddlewareOutcome;

    /// Middleware name used in logs and veto errors.
    fn name(&self) -> &str;
}

/// Vetoes events whose name has an empty segment or contains a wildcard.
///
/// Wildcards belong in subscription patterns, never in emitted names.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameValidation;

#[async_trait]
impl Middleware for NameValidation {
    async fn process(&self, event: Event) -> MiddlewareOutcome {
        let name = event.name();
        if name.is_empty() || name.split('.').any(str::is_empty) {
            return MiddlewareOutcome::Veto(format!("malformed event name {name:?}"));
        }
        if name.split('.').any(|segment| segment == WILDCARD) {
            return MiddlewareOutcome::Veto(format!("wildcard in event name {name:?}"));
        }
        MiddlewareOutcome::Continue(event)
    }

    fn name(&self) -> &str {
        "name_validation"
    }
}

/// Fills in a missing scope from a string field of the payload.
///
/// Lets producers that only put e.g. `"project_id"` in the payload still
/// reach the matching channel.
#[derive(Debug, Clone)]
pub struct ScopeDefault {
    payload_key: String,
    prefix: String,
}

impl ScopeDefault {
    /// Derives the scope as `"{prefix}{payload[payload_key]}"`.
    #[must_use]
    pub fn new(payload_key: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            payload_key: payload_key.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Middleware for ScopeDefault {
    async fn process(&self, event: Event) -> MiddlewareOutcome {
        if event.scope().is_some() {
            return MiddlewareOutcome::Continue(event);
        }
        let derived = event
            .payload()
            .get(&self.payload_key)
            .and_then(|v| v.as_str())
            .map(|value| format!("{}{value}", self.prefix));
        match derived {
            Some(scope) => MiddlewareOutcome::Continue(event.with_scope(Some(scope))),
            None => MiddlewareOutcome::Continue(event),
        }
    }

    fn name(&self) -> &str {
        "scope_default"
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::EventDraft;

    fn event(name: &str) -> Event {
        Event::from_draft(EventDraft::new(name, "test"))
    }

    #[tokio::test]
    async fn name_validation_passes_well_formed_names() {
        let outcome = NameValidation.process(event("task.created")).await;
        assert!(matches!(outcome, MiddlewareOutcome::Continue(_)));
    }

    #[tokio::test]
    async fn name_validation_vetoes_bad_names() {
        for name in ["", "task..created", "task.*"] {
            let outcome = NameValidation.process(event(name)).await;
            assert!(matches!(outcome, MiddlewareOutcome::Veto(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn scope_default_derives_scope_from_payload() {
        let mw = ScopeDefault::new("project_id", "project:");
        let ev = Event::from_draft(
            EventDraft::new("task.created", "test")
                .with_payload(serde_json::json!({"project_id": "p1"})),
        );
        let MiddlewareOutcome::Continue(ev) = mw.process(ev).await else {
            panic!("scope_default never vetoes");
        };
        assert_eq!(ev.scope(), Some("project:p1"));
    }

    #[tokio::test]
    async fn scope_default_keeps_explicit_scope() {
        let mw = ScopeDefault::new("project_id", "project:");
        let ev = Event::from_draft(
            EventDraft::new("task.created", "test")
                .with_scope("room:1")
                .with_payload(serde_json::json!({"project_id": "p1"})),
        );
        let MiddlewareOutcome::Continue(ev) = mw.process(ev).await else {
            panic!("scope_default never vetoes");
        };
        assert_eq!(ev.scope(), Some("room:1"));
    }
}
