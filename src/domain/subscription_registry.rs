//! Subscription storage with a pattern index.
//!
//! [`SubscriptionRegistry`] keeps subscriptions keyed by id together with a
//! pattern → ids index. Both live behind a single [`tokio::sync::RwLock`] so
//! every insert and removal updates them in one critical section.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use super::pattern;
use super::{Event, Subscription, SubscriptionId};

#[derive(Debug, Default)]
struct RegistryState {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    by_pattern: HashMap<String, HashSet<SubscriptionId>>,
    next_sequence: u64,
}

/// Central store for all subscriptions.
///
/// # Concurrency
///
/// - [`SubscriptionRegistry::find_matching`] takes the read lock and returns
///   a snapshot, so handlers may subscribe or unsubscribe while an emission
///   is iterating its matches.
/// - Mutations take the write lock for the whole compound update.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a subscription and indexes it under its pattern.
    ///
    /// Assigns the registration sequence used for priority tie-breaks.
    pub async fn add(&self, mut subscription: Subscription) -> SubscriptionId {
        let id = subscription.id;
        let mut state = self.state.write().await;
        subscription.sequence = state.next_sequence;
        state.next_sequence = state.next_sequence.wrapping_add(1);
        state
            .by_pattern
            .entry(subscription.pattern.clone())
            .or_default()
            .insert(id);
        state.subscriptions.insert(id, subscription);
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub async fn remove(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.write().await;
        let Some(subscription) = state.subscriptions.remove(&id) else {
            return false;
        };
        if let Some(ids) = state.by_pattern.get_mut(&subscription.pattern) {
            ids.remove(&id);
            if ids.is_empty() {
                state.by_pattern.remove(&subscription.pattern);
            }
        }
        true
    }

    /// Removes several subscriptions in one critical section. Returns how
    /// many were actually registered.
    pub async fn remove_all(&self, ids: &[SubscriptionId]) -> usize {
        let mut state = self.state.write().await;
        let mut removed = 0;
        for id in ids {
            let Some(subscription) = state.subscriptions.remove(id) else {
                continue;
            };
            if let Some(set) = state.by_pattern.get_mut(&subscription.pattern) {
                set.remove(id);
                if set.is_empty() {
                    state.by_pattern.remove(&subscription.pattern);
                }
            }
            removed += 1;
        }
        removed
    }

    /// Pauses or resumes a subscription. Returns `false` if it is not
    /// registered.
    pub async fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&id) {
            Some(subscription) => {
                subscription.active = active;
                true
            }
            None => false,
        }
    }

    /// Deactivates an active subscription in one step. Returns `true` only
    /// for the caller that flipped it, so at most one concurrent dispatch
    /// may run a `once` subscription.
    pub async fn claim(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&id) {
            Some(subscription) if subscription.active => {
                subscription.active = false;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the subscription is registered and active.
    pub async fn is_live(&self, id: SubscriptionId) -> bool {
        self.state
            .read()
            .await
            .subscriptions
            .get(&id)
            .is_some_and(|s| s.active)
    }

    /// Returns a copy of the subscription, if registered.
    pub async fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.state.read().await.subscriptions.get(&id).cloned()
    }

    /// Returns a snapshot of every active subscription whose pattern and
    /// filters accept `event`.
    ///
    /// The result is unordered; the bus sorts it by
    /// [`Subscription::dispatch_key`].
    pub async fn find_matching(&self, event: &Event) -> Vec<Subscription> {
        let state = self.state.read().await;
        state
            .by_pattern
            .iter()
            .filter(|(p, _)| pattern::matches(event.name(), p))
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| state.subscriptions.get(id))
            .filter(|s| s.active && s.accepts(event))
            .cloned()
            .collect()
    }

    /// Ids currently indexed under `pattern`.
    pub async fn ids_for_pattern(&self, pattern: &str) -> Vec<SubscriptionId> {
        self.state
            .read()
            .await
            .by_pattern
            .get(pattern)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of registered subscriptions.
    pub async fn len(&self) -> usize {
        self.state.read().await.subscriptions.len()
    }

    /// Returns `true` if no subscriptions are registered.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.subscriptions.is_empty()
    }

    /// Number of distinct patterns in the index.
    pub async fn pattern_count(&self) -> usize {
        self.state.read().await.by_pattern.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{EventDraft, EventHandler, FnHandler, SubscribeOptions, UserId};

    fn noop() -> Arc<dyn EventHandler> {
        FnHandler::shared("noop", |_| Ok(()))
    }

    fn sub(pattern: &str) -> Subscription {
        Subscription::new(pattern, noop(), SubscribeOptions::default())
    }

    fn event(name: &str) -> Event {
        Event::from_draft(EventDraft::new(name, "test"))
    }

    #[tokio::test]
    async fn add_indexes_by_pattern() {
        let registry = SubscriptionRegistry::new();
        let id = registry.add(sub("task.*")).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.ids_for_pattern("task.*").await, vec![id]);
    }

    #[tokio::test]
    async fn remove_clears_both_structures() {
        let registry = SubscriptionRegistry::new();
        let id = registry.add(sub("task.*")).await;
        assert!(registry.remove(id).await);
        assert!(registry.is_empty().await);
        assert_eq!(registry.pattern_count().await, 0);
        assert!(!registry.remove(id).await);
    }

    #[tokio::test]
    async fn shared_pattern_keeps_index_until_last_removal() {
        let registry = SubscriptionRegistry::new();
        let a = registry.add(sub("task.*")).await;
        let b = registry.add(sub("task.*")).await;
        assert_eq!(registry.pattern_count().await, 1);
        assert!(registry.remove(a).await);
        assert_eq!(registry.ids_for_pattern("task.*").await, vec![b]);
        assert_eq!(registry.remove_all(&[a, b]).await, 1);
        assert_eq!(registry.pattern_count().await, 0);
    }

    #[tokio::test]
    async fn find_matching_applies_pattern_and_filters() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("task.*")).await;
        registry.add(sub("project.*")).await;
        registry
            .add(Subscription::new(
                "task.created",
                noop(),
                SubscribeOptions::default().with_user(UserId::new("u1")),
            ))
            .await;

        let matches = registry.find_matching(&event("task.created")).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches.first().map(|s| s.pattern.as_str()), Some("task.*"));
    }

    #[tokio::test]
    async fn inactive_subscriptions_are_skipped() {
        let registry = SubscriptionRegistry::new();
        let id = registry.add(sub("task.*")).await;
        assert!(registry.set_active(id, false).await);
        assert!(!registry.is_live(id).await);
        assert!(registry.find_matching(&event("task.created")).await.is_empty());
        assert!(registry.set_active(id, true).await);
        assert_eq!(registry.find_matching(&event("task.created")).await.len(), 1);
        assert!(!registry.set_active(SubscriptionId::new(), true).await);
    }

    #[tokio::test]
    async fn sequence_follows_registration_order() {
        let registry = SubscriptionRegistry::new();
        let first = registry.add(sub("a")).await;
        let second = registry.add(sub("a")).await;
        let (Some(first), Some(second)) = (registry.get(first).await, registry.get(second).await)
        else {
            panic!("subscriptions should be registered");
        };
        assert!(first.sequence < second.sequence);
    }

    #[tokio::test]
    async fn snapshot_survives_removal() {
        let registry = SubscriptionRegistry::new();
        let id = registry.add(sub("task.*")).await;
        let snapshot = registry.find_matching(&event("task.created")).await;
        registry.remove(id).await;
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn claim_succeeds_once() {
        let registry = SubscriptionRegistry::new();
        let id = registry.add(sub("task.*")).await;
        assert!(registry.claim(id).await);
        assert!(!registry.claim(id).await);
        assert!(!registry.is_live(id).await);
        assert!(!registry.claim(SubscriptionId::new()).await);
    }
}
