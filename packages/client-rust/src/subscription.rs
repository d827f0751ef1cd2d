//! Subscription lifecycle management.
//!
//! [`SubscriptionManager`] owns every live query opened on behalf of a
//! consumer (a screen, a view model, a background task). It guarantees:
//!
//! - at most one live subscription per `(consumer, query)` pair; observing a
//!   structurally equal query again replaces the previous subscription,
//! - a transport error is forwarded exactly once and ends the subscription,
//! - once `cancel`/`cancel_all` returns, the callback is never invoked again
//!   for the cancelled subscriptions, even for events already in flight.
//!
//! Each subscription has a delivery gate: a re-entrant lock around its
//! state. Deliveries hold the gate while running the callback and
//! cancellation closes it under the same lock, so a returned `cancel` has
//! either waited for an in-flight delivery or prevented it. The lock is
//! re-entrant so a callback may cancel its own subscription.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use schoolsync_core::{Query, QueryKey, Snapshot};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::source::{RemoteSource, SnapshotListener, SourceEvent, SourceSubscription};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identity of a consumer whose subscriptions are managed together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(String);

impl ConsumerId {
    /// Creates a random consumer id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Creates a consumer id from a caller-chosen label.
    pub fn named(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one `observe` call, assigned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Returned by [`SubscriptionManager::observe`]; pass it back to cancel or retry.
///
/// A handle goes stale when its subscription is cancelled or replaced;
/// operations on stale handles are no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: HandleId,
    consumer: ConsumerId,
    key: QueryKey,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    #[must_use]
    pub fn query_key(&self) -> &QueryKey {
        &self.key
    }
}

/// Observable state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Receiving events.
    Live,
    /// Ended by a transport error; can be retried.
    Failed,
}

// ---------------------------------------------------------------------------
// Delivery gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Open,
    Failed,
    Closed,
}

type EventCallback = Arc<dyn Fn(SourceEvent) + Send + Sync>;

/// One managed subscription.
struct Entry {
    handle: HandleId,
    query: Query,
    on_event: EventCallback,
    gate: ReentrantMutex<Cell<GateState>>,
    source_sub: Mutex<Option<Box<dyn SourceSubscription>>>,
}

impl Entry {
    fn state(&self) -> GateState {
        self.gate.lock().get()
    }

    /// Delivers `event` if the gate is open. A terminal error also fails the gate.
    fn deliver(&self, event: SourceEvent) -> bool {
        let gate = self.gate.lock();
        if gate.get() != GateState::Open {
            return false;
        }
        if event.is_error() {
            gate.set(GateState::Failed);
        }
        (self.on_event)(event);
        true
    }

    /// Stores the source registration, or cancels it at once if the entry was
    /// closed while the source was registering.
    fn attach(&self, sub: Box<dyn SourceSubscription>) {
        *self.source_sub.lock() = Some(sub);
        if self.state() == GateState::Closed {
            let sub = self.source_sub.lock().take();
            if let Some(sub) = sub {
                sub.cancel();
            }
        }
    }

    /// Closes the gate and cancels the source registration. Idempotent.
    fn close(&self) {
        self.gate.lock().set(GateState::Closed);
        let sub = self.source_sub.lock().take();
        if let Some(sub) = sub {
            sub.cancel();
        }
    }
}

/// Listener handed to the source; forwards through the entry's gate.
struct Forwarder {
    entry: Weak<Entry>,
    consumer: ConsumerId,
}

impl SnapshotListener for Forwarder {
    fn on_snapshot(&self, snapshot: Snapshot) {
        if let Some(entry) = self.entry.upgrade() {
            if !entry.deliver(SourceEvent::Snapshot(snapshot)) {
                debug!(consumer = %self.consumer, handle = %entry.handle, "discarded late snapshot");
            }
        }
    }

    fn on_error(&self, error: SourceError) {
        let Some(entry) = self.entry.upgrade() else {
            return;
        };
        warn!(
            consumer = %self.consumer,
            handle = %entry.handle,
            collection = entry.query.collection_name(),
            %error,
            "subscription failed"
        );
        // The source is done with this registration either way.
        if let Some(sub) = entry.source_sub.lock().take() {
            sub.cancel();
        }
        entry.deliver(SourceEvent::Error(error));
    }
}

// ---------------------------------------------------------------------------
// SubscriptionManager
// ---------------------------------------------------------------------------

type Slot = (ConsumerId, QueryKey);

/// Owns live subscriptions per consumer. Construct once and share by `Arc`.
pub struct SubscriptionManager {
    source: Arc<dyn RemoteSource>,
    entries: DashMap<Slot, Arc<Entry>>,
    by_handle: DashMap<HandleId, Slot>,
    next_id: AtomicU64,
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("entries", &self.entries.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Creates a manager over `source`. Handle ids start at 1.
    #[must_use]
    pub fn new(source: Arc<dyn RemoteSource>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            by_handle: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The source this manager subscribes against.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn RemoteSource> {
        &self.source
    }

    /// Starts (or replaces) the live query `query` for `consumer`.
    ///
    /// `on_event` receives the initial snapshot, every later snapshot, and at
    /// most one terminal error. If the source refuses the registration, the
    /// error is delivered through `on_event` and the subscription is recorded
    /// as failed so it can be retried.
    pub fn observe<F>(&self, consumer: &ConsumerId, query: Query, on_event: F) -> SubscriptionHandle
    where
        F: Fn(SourceEvent) + Send + Sync + 'static,
    {
        self.observe_with(consumer, query, Arc::new(on_event))
    }

    fn observe_with(
        &self,
        consumer: &ConsumerId,
        query: Query,
        on_event: EventCallback,
    ) -> SubscriptionHandle {
        let key = query.key();
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot: Slot = (consumer.clone(), key.clone());

        let entry = Arc::new(Entry {
            handle: id,
            query: query.clone(),
            on_event,
            gate: ReentrantMutex::new(Cell::new(GateState::Open)),
            source_sub: Mutex::new(None),
        });

        // Index the handle first: a concurrent cancel_all that removes the
        // entry must find its by_handle row.
        self.by_handle.insert(id, slot.clone());
        let previous = self.entries.insert(slot, Arc::clone(&entry));
        if let Some(previous) = previous {
            self.by_handle.remove(&previous.handle);
            previous.close();
            debug!(%consumer, old = %previous.handle, new = %id, %query, "replaced subscription");
        } else {
            debug!(%consumer, handle = %id, %query, "observing");
        }

        let forwarder = Arc::new(Forwarder {
            entry: Arc::downgrade(&entry),
            consumer: consumer.clone(),
        });
        match self.source.subscribe(&query, forwarder) {
            Ok(sub) => entry.attach(sub),
            Err(error) => {
                warn!(%consumer, handle = %id, %query, %error, "source refused subscription");
                entry.deliver(SourceEvent::Error(error));
            }
        }

        SubscriptionHandle {
            id,
            consumer: consumer.clone(),
            key,
        }
    }

    /// Cancels one subscription. Unknown, stale, or already cancelled handles
    /// are ignored.
    pub fn cancel(&self, handle: &SubscriptionHandle) {
        let Some((_, slot)) = self.by_handle.remove(&handle.id) else {
            return;
        };
        if let Some((_, entry)) = self.entries.remove_if(&slot, |_, e| e.handle == handle.id) {
            entry.close();
            debug!(consumer = %handle.consumer, handle = %handle.id, "cancelled subscription");
        }
    }

    /// Cancels every subscription of `consumer`. Safe to call repeatedly.
    pub fn cancel_all(&self, consumer: &ConsumerId) {
        let slots: Vec<Slot> = self
            .entries
            .iter()
            .filter(|e| &e.key().0 == consumer)
            .map(|e| e.key().clone())
            .collect();

        let mut cancelled = 0usize;
        for slot in slots {
            if let Some((_, entry)) = self.entries.remove(&slot) {
                self.by_handle.remove(&entry.handle);
                entry.close();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(%consumer, cancelled, "cancelled all subscriptions");
        }
    }

    /// Re-issues `observe` for the subscription behind `handle`, with the same
    /// consumer, query and callback. Returns the new handle, or `None` if the
    /// handle is unknown or stale.
    pub fn retry(&self, handle: &SubscriptionHandle) -> Option<SubscriptionHandle> {
        let slot = self.by_handle.get(&handle.id)?.value().clone();
        let entry = Arc::clone(self.entries.get(&slot)?.value());
        debug!(consumer = %handle.consumer, handle = %handle.id, "retrying subscription");
        Some(self.observe_with(&handle.consumer, entry.query.clone(), Arc::clone(&entry.on_event)))
    }

    /// Status of the subscription behind `handle`, or `None` if stale.
    #[must_use]
    pub fn status(&self, handle: &SubscriptionHandle) -> Option<SubscriptionStatus> {
        let slot = self.by_handle.get(&handle.id)?.value().clone();
        let entry = Arc::clone(self.entries.get(&slot)?.value());
        match entry.state() {
            GateState::Open => Some(SubscriptionStatus::Live),
            GateState::Failed => Some(SubscriptionStatus::Failed),
            GateState::Closed => None,
        }
    }

    /// Number of live (non-failed) subscriptions of `consumer`.
    #[must_use]
    pub fn live_count(&self, consumer: &ConsumerId) -> usize {
        let entries: Vec<Arc<Entry>> = self
            .entries
            .iter()
            .filter(|e| &e.key().0 == consumer)
            .map(|e| Arc::clone(e.value()))
            .collect();
        entries
            .iter()
            .filter(|e| e.state() == GateState::Open)
            .count()
    }

    /// Consumers that currently hold at least one subscription.
    #[must_use]
    pub fn consumers(&self) -> Vec<ConsumerId> {
        let set: HashSet<ConsumerId> = self.entries.iter().map(|e| e.key().0.clone()).collect();
        let mut out: Vec<ConsumerId> = set.into_iter().collect();
        out.sort();
        out
    }

    /// Cancels every subscription of every consumer.
    pub fn shutdown(&self) {
        for consumer in self.consumers() {
            self.cancel_all(&consumer);
        }
    }

    /// Stream rendition of [`Self::observe`]: events arrive on a channel.
    ///
    /// Dropping the stream cancels the subscription.
    pub fn stream(self: &Arc<Self>, consumer: &ConsumerId, query: Query) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.observe(consumer, query, move |event| {
            // The receiver may be gone if the stream is being dropped.
            let _ = tx.send(event);
        });
        EventStream {
            handle,
            manager: Arc::downgrade(self),
            rx,
        }
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Cancellable stream of [`SourceEvent`]s for one subscription.
#[derive(Debug)]
pub struct EventStream {
    handle: SubscriptionHandle,
    manager: Weak<SubscriptionManager>,
    rx: mpsc::UnboundedReceiver<SourceEvent>,
}

impl EventStream {
    #[must_use]
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Waits for the next event. Returns `None` once the subscription was
    /// cancelled and buffered events are drained.
    pub async fn recv(&mut self) -> Option<SourceEvent> {
        self.rx.recv().await
    }

    /// Returns a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<SourceEvent> {
        self.rx.try_recv().ok()
    }

    /// Cancels the subscription. Idempotent.
    pub fn cancel(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.cancel(&self.handle);
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel();
    }
}
