//! Glue between a subject, its live queries, and an aggregate store.
//!
//! A [`LiveBinding`] is what a screen holds: it observes every query an
//! aggregate needs for the current subject, folds their events into its
//! store, and tears everything down when the subject changes or the binding
//! goes away.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use schoolsync_core::SubjectId;
use tracing::{debug, info};

use crate::source::SourceEvent;
use crate::store::{Aggregate, AggregateStore};
use crate::subscription::{ConsumerId, SubscriptionHandle, SubscriptionManager, SubscriptionStatus};

#[derive(Debug, Default)]
struct BindingState {
    subject: Option<SubjectId>,
    handles: Vec<SubscriptionHandle>,
}

/// Keeps an [`AggregateStore`] fed for one subject at a time.
pub struct LiveBinding<A: Aggregate> {
    consumer: ConsumerId,
    manager: Arc<SubscriptionManager>,
    store: Arc<AggregateStore<A>>,
    state: Mutex<BindingState>,
}

impl<A: Aggregate> std::fmt::Debug for LiveBinding<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LiveBinding")
            .field("consumer", &self.consumer)
            .field("subject", &state.subject)
            .field("handles", &state.handles.len())
            .finish_non_exhaustive()
    }
}

impl<A: Aggregate> LiveBinding<A> {
    /// Creates an unbound binding with a fresh consumer id.
    pub fn new(manager: Arc<SubscriptionManager>, aggregate: A) -> Self {
        Self::with_consumer(ConsumerId::new(), manager, aggregate)
    }

    pub fn with_consumer(
        consumer: ConsumerId,
        manager: Arc<SubscriptionManager>,
        aggregate: A,
    ) -> Self {
        Self {
            consumer,
            manager,
            store: Arc::new(AggregateStore::new(aggregate)),
            state: Mutex::new(BindingState::default()),
        }
    }

    #[must_use]
    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    /// The store this binding feeds.
    #[must_use]
    pub fn store(&self) -> &Arc<AggregateStore<A>> {
        &self.store
    }

    /// Currently bound subject.
    #[must_use]
    pub fn subject(&self) -> Option<SubjectId> {
        self.state.lock().subject.clone()
    }

    /// Binds to `subject`.
    ///
    /// Binding the current subject again does nothing. Binding another
    /// subject cancels every subscription of the previous one and resets the
    /// store to its initial state before observing the new queries.
    pub fn bind(&self, subject: &SubjectId) {
        let previous = {
            let mut state = self.state.lock();
            if state.subject.as_ref() == Some(subject) {
                return;
            }
            state.handles.clear();
            state.subject.replace(subject.clone())
        };
        if let Some(previous) = previous {
            self.manager.cancel_all(&self.consumer);
            info!(consumer = %self.consumer, from = %previous, to = %subject, "subject changed");
        }
        self.store.reset();

        // Observe outside the lock: the initial snapshot is delivered
        // synchronously and observers may call back into the binding.
        let handles: Vec<SubscriptionHandle> = self
            .store
            .aggregate()
            .queries(subject)
            .into_iter()
            .map(|(source, query)| {
                let store = Arc::downgrade(&self.store);
                self.manager.observe(&self.consumer, query, move |event| {
                    fold_into(&store, source, &event);
                })
            })
            .collect();

        debug!(consumer = %self.consumer, %subject, queries = handles.len(), "bound");
        let mut state = self.state.lock();
        if state.subject.as_ref() == Some(subject) {
            state.handles = handles;
        }
    }

    /// Re-issues every subscription that ended with a transport error.
    /// Returns how many were retried.
    pub fn retry(&self) -> usize {
        let failed: Vec<SubscriptionHandle> = self
            .state
            .lock()
            .handles
            .iter()
            .filter(|h| self.manager.status(h) == Some(SubscriptionStatus::Failed))
            .cloned()
            .collect();

        // Retrying delivers the initial snapshot synchronously; keep the
        // binding unlocked while it runs.
        let mut retried = 0;
        for handle in failed {
            let Some(fresh) = self.manager.retry(&handle) else {
                continue;
            };
            retried += 1;
            let mut state = self.state.lock();
            if let Some(slot) = state.handles.iter_mut().find(|h| **h == handle) {
                *slot = fresh;
            }
        }
        if retried > 0 {
            info!(consumer = %self.consumer, retried, "retried failed subscriptions");
        }
        retried
    }

    /// Number of failed subscriptions awaiting [`retry`](Self::retry).
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.state
            .lock()
            .handles
            .iter()
            .filter(|h| self.manager.status(h) == Some(SubscriptionStatus::Failed))
            .count()
    }

    /// Cancels every subscription and forgets the subject. Idempotent.
    ///
    /// The store keeps its last value.
    pub fn teardown(&self) {
        let subject = {
            let mut state = self.state.lock();
            state.handles.clear();
            state.subject.take()
        };
        self.manager.cancel_all(&self.consumer);
        if let Some(subject) = subject {
            debug!(consumer = %self.consumer, %subject, "torn down");
        }
    }
}

impl<A: Aggregate> Drop for LiveBinding<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn fold_into<A: Aggregate>(store: &Weak<AggregateStore<A>>, source: A::Source, event: &SourceEvent) {
    if let Some(store) = store.upgrade() {
        store.fold(source, event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use schoolsync_core::Document;

    use super::*;
    use crate::aggregates::{GradeAggregate, Tally, UnreadAggregate, UnreadCounts};
    use crate::error::SourceError;
    use crate::source::{InMemorySource, RemoteSource};

    fn unread(id: &str, field: &str, owner: &str) -> Document {
        Document::new(id).with(field, owner).with("read", false)
    }

    fn setup() -> (Arc<InMemorySource>, Arc<SubscriptionManager>) {
        let source = Arc::new(InMemorySource::new());
        let manager = Arc::new(SubscriptionManager::new(
            Arc::clone(&source) as Arc<dyn RemoteSource>
        ));
        (source, manager)
    }

    #[test]
    fn bind_feeds_store_from_initial_snapshots() {
        let (source, manager) = setup();
        source.seed(
            "notifications",
            [unread("n1", "userId", "u1"), unread("n2", "userId", "u1")],
        );
        source.seed("messages", [unread("m1", "recipientId", "u1")]);

        let binding = LiveBinding::new(Arc::clone(&manager), UnreadAggregate::default());
        binding.bind(&SubjectId::new("u1"));

        let counts = binding.store().current();
        assert_eq!(counts.notifications, Tally::Count(2));
        assert_eq!(counts.messages, Tally::Count(1));
        assert_eq!(counts.total(), 3);
        assert_eq!(manager.live_count(binding.consumer()), 2);
    }

    #[test]
    fn update_of_one_feed_leaves_the_other_untouched() {
        let (source, manager) = setup();
        source.seed("messages", [unread("m1", "recipientId", "u1")]);
        let binding = LiveBinding::new(manager, UnreadAggregate::default());
        binding.bind(&SubjectId::new("u1"));

        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        let _registration = binding.store().subscribe_to_changes(move |_: &UnreadCounts| {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        source.seed("notifications", [unread("n1", "userId", "u1")]);
        let counts = binding.store().current();
        assert_eq!(counts.notifications, Tally::Count(1));
        assert_eq!(counts.messages, Tally::Count(1));
        assert_eq!(changes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn rebinding_same_subject_is_a_no_op() {
        let (source, manager) = setup();
        let binding = LiveBinding::new(Arc::clone(&manager), UnreadAggregate::default());
        let subject = SubjectId::new("u1");
        binding.bind(&subject);
        binding.bind(&subject);

        assert_eq!(source.listener_count(), 2);
        assert_eq!(manager.live_count(binding.consumer()), 2);
    }

    #[test]
    fn subject_change_cancels_old_subscriptions() {
        let (source, manager) = setup();
        source.seed("notifications", [unread("n1", "userId", "u1")]);
        let binding = LiveBinding::new(Arc::clone(&manager), UnreadAggregate::default());

        binding.bind(&SubjectId::new("u1"));
        assert_eq!(binding.store().current().notifications, Tally::Count(1));

        binding.bind(&SubjectId::new("u2"));
        assert_eq!(binding.subject(), Some(SubjectId::new("u2")));
        assert_eq!(source.listener_count(), 2);
        assert_eq!(binding.store().current().notifications, Tally::Count(0));

        // Changes for the old subject no longer reach the store.
        source.seed("notifications", [unread("n2", "userId", "u1")]);
        assert_eq!(binding.store().current().notifications, Tally::Count(0));
    }

    #[test]
    fn teardown_is_idempotent_and_stops_updates() {
        let (source, manager) = setup();
        let binding = LiveBinding::new(Arc::clone(&manager), UnreadAggregate::default());
        binding.bind(&SubjectId::new("u1"));

        binding.teardown();
        binding.teardown();
        assert_eq!(source.listener_count(), 0);
        assert_eq!(binding.subject(), None);

        source.seed("notifications", [unread("n1", "userId", "u1")]);
        assert_eq!(binding.store().current().notifications, Tally::Count(0));
    }

    #[test]
    fn drop_tears_down() {
        let (source, manager) = setup();
        {
            let binding = LiveBinding::new(Arc::clone(&manager), GradeAggregate::default());
            binding.bind(&SubjectId::new("s1"));
            assert_eq!(source.listener_count(), 1);
        }
        assert_eq!(source.listener_count(), 0);
        assert!(manager.consumers().is_empty());
    }

    #[test]
    fn failed_feed_is_retried() {
        let (source, manager) = setup();
        let binding = LiveBinding::new(manager, UnreadAggregate::default());
        binding.bind(&SubjectId::new("u1"));

        let error = SourceError::Unavailable("offline".to_string());
        source.fail_collection("messages", &error);
        let counts = binding.store().current();
        assert_eq!(counts.messages, Tally::Failed(error));
        assert_eq!(counts.notifications, Tally::Count(0));
        assert_eq!(binding.failed_count(), 1);

        source.seed("messages", [unread("m1", "recipientId", "u1")]);
        assert_eq!(binding.retry(), 1);
        assert_eq!(binding.failed_count(), 0);
        assert_eq!(binding.store().current().messages, Tally::Count(1));

        // Nothing left to retry.
        assert_eq!(binding.retry(), 0);
    }

    #[test]
    fn denied_collection_fails_at_bind_time() {
        let (source, manager) = setup();
        source.deny_collection("grades", SourceError::PermissionDenied("grades".to_string()));
        let binding = LiveBinding::new(manager, GradeAggregate::default());
        binding.bind(&SubjectId::new("s1"));

        assert!(matches!(
            *binding.store().current(),
            crate::aggregates::GradeSummary::Failed(SourceError::PermissionDenied(_))
        ));

        source.allow_collection("grades");
        assert_eq!(binding.retry(), 1);
        assert_eq!(binding.store().current().average(), None);
        assert!(!binding.store().current().is_loading());
    }
}
