//! Observable aggregate state.
//!
//! An [`Aggregate`] describes how source events fold into a derived value
//! (an unread badge, a grade summary). [`AggregateStore`] holds the current
//! value behind an `ArcSwap`, applies folds, and tells observers when the
//! value actually changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{ReentrantMutex, RwLock};
use schoolsync_core::{Query, SubjectId};
use tokio::sync::watch;
use tracing::trace;

use crate::source::SourceEvent;

/// Definition of a derived value and the queries that feed it.
///
/// `fold` must be pure: the next state depends only on the current state,
/// the event, and which of the aggregate's queries produced it.
pub trait Aggregate: Send + Sync + 'static {
    /// The observable value.
    type State: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    /// Tag telling `fold` which query an event belongs to.
    type Source: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Value before any event arrived.
    fn initial(&self) -> Self::State;

    /// Applies one event from `source`.
    fn fold(&self, state: &Self::State, source: Self::Source, event: &SourceEvent) -> Self::State;

    /// Live queries that feed this aggregate for `subject`.
    fn queries(&self, subject: &SubjectId) -> Vec<(Self::Source, Query)>;
}

type Observer<S> = Arc<dyn Fn(&S) + Send + Sync>;

struct Observers<S> {
    next_id: AtomicU64,
    entries: RwLock<BTreeMap<u64, Observer<S>>>,
}

/// Holds the current state of one aggregate.
pub struct AggregateStore<A: Aggregate> {
    aggregate: A,
    state: ArcSwap<A::State>,
    tx: watch::Sender<Arc<A::State>>,
    observers: Arc<Observers<A::State>>,
    /// Held across swap and publish so `watch` and observers see states in
    /// swap order. Re-entrant so an observer may fold or reset.
    publishing: ReentrantMutex<()>,
}

impl<A: Aggregate> fmt::Debug for AggregateStore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateStore")
            .field("state", &*self.state.load())
            .finish_non_exhaustive()
    }
}

impl<A: Aggregate> AggregateStore<A> {
    /// Creates a store holding `aggregate.initial()`.
    pub fn new(aggregate: A) -> Self {
        let initial = Arc::new(aggregate.initial());
        let (tx, _rx) = watch::channel(Arc::clone(&initial));
        Self {
            aggregate,
            state: ArcSwap::new(initial),
            tx,
            observers: Arc::new(Observers {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(BTreeMap::new()),
            }),
            publishing: ReentrantMutex::new(()),
        }
    }

    #[must_use]
    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    /// Current value.
    #[must_use]
    pub fn current(&self) -> Arc<A::State> {
        self.state.load_full()
    }

    /// Receiver that always holds the latest value.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<A::State>> {
        self.tx.subscribe()
    }

    /// Registers `observer` for every later change of the value.
    ///
    /// The observer is not called with the current value. It stays
    /// registered until [`Unsubscribe::unsubscribe`] is called.
    pub fn subscribe_to_changes<F>(&self, observer: F) -> Unsubscribe<A::State>
    where
        F: Fn(&A::State) + Send + Sync + 'static,
    {
        let id = self.observers.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.entries.write().insert(id, Arc::new(observer));
        Unsubscribe {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Number of registered change observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.entries.read().len()
    }

    /// Folds `event` from `source` into the state and returns the new value.
    ///
    /// Observers run only when the value changed.
    pub fn fold(&self, source: A::Source, event: &SourceEvent) -> Arc<A::State> {
        let _publishing = self.publishing.lock();
        let mut next = None;
        let previous = self.state.rcu(|current| {
            let folded = Arc::new(self.aggregate.fold(current, source, event));
            next = Some(Arc::clone(&folded));
            folded
        });
        let next = next.unwrap_or_else(|| self.state.load_full());
        if *previous != *next {
            trace!(?source, state = ?next, "aggregate changed");
            self.publish(&next);
        }
        next
    }

    /// Returns the state to `initial()`, notifying observers if it changed.
    pub fn reset(&self) {
        let _publishing = self.publishing.lock();
        let initial = Arc::new(self.aggregate.initial());
        let previous = self.state.swap(Arc::clone(&initial));
        if *previous != *initial {
            self.publish(&initial);
        }
    }

    fn publish(&self, state: &Arc<A::State>) {
        self.tx.send_replace(Arc::clone(state));
        let observers: Vec<Observer<A::State>> =
            self.observers.entries.read().values().cloned().collect();
        for observer in observers {
            // An observer folded again on this thread; the newer state has
            // already been published to everyone.
            if !Arc::ptr_eq(&*self.state.load(), state) {
                break;
            }
            observer(state);
        }
    }
}

/// Registration returned by [`AggregateStore::subscribe_to_changes`].
///
/// Dropping it does not unregister the observer; call
/// [`unsubscribe`](Self::unsubscribe).
#[must_use = "keep the registration to unsubscribe later"]
pub struct Unsubscribe<S> {
    id: u64,
    observers: Weak<Observers<S>>,
}

impl<S> Unsubscribe<S> {
    /// Removes the observer. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.entries.write().remove(&self.id);
        }
    }
}

impl<S> fmt::Debug for Unsubscribe<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}
