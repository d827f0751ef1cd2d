//! In-process [`RemoteSource`] backed by [`DashMap`].
//!
//! Holds collections in memory, re-evaluates every live query after each
//! mutation and pushes the new full snapshot to its listener when the result
//! set changed. Failure injection (`fail_collection`, `deny_collection`,
//! `close`) lets tests and demos exercise the error paths of the client.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use schoolsync_core::{Document, Query, Snapshot};
use tracing::{debug, warn};

use super::{Mutation, RemoteSource, SnapshotListener, SourceSubscription};
use crate::error::SourceError;

/// A registered live query.
struct ListenerEntry {
    query: Query,
    listener: Arc<dyn SnapshotListener>,
    /// Last snapshot pushed, used to suppress unchanged deliveries.
    last: Mutex<Option<Snapshot>>,
}

struct Inner {
    collections: DashMap<String, BTreeMap<String, Document>>,
    listeners: DashMap<u64, Arc<ListenerEntry>>,
    /// Collections that refuse reads and registrations, with the error to report.
    denied: DashMap<String, SourceError>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Serializes apply-then-notify so each query sees its snapshots in order.
    /// Re-entrant so listeners may mutate from inside a callback.
    delivery: ReentrantMutex<()>,
}

impl Inner {
    fn check_open(&self, collection: &str) -> Result<(), SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Unavailable("source is closed".to_string()));
        }
        if let Some(err) = self.denied.get(collection) {
            return Err(err.value().clone());
        }
        Ok(())
    }

    fn evaluate(&self, query: &Query) -> Snapshot {
        match self.collections.get(query.collection_name()) {
            Some(docs) => Snapshot::new(query.evaluate(docs.values())),
            None => Snapshot::default(),
        }
    }

    /// Pushes the current result set to every listener of `collection` whose
    /// result set changed. No map guard is held while listeners run.
    fn notify_collection(&self, collection: &str) {
        let entries: Vec<Arc<ListenerEntry>> = self
            .listeners
            .iter()
            .filter(|e| e.value().query.collection_name() == collection)
            .map(|e| Arc::clone(e.value()))
            .collect();

        for entry in entries {
            let snapshot = self.evaluate(&entry.query);
            {
                let mut last = entry.last.lock();
                if last.as_ref() == Some(&snapshot) {
                    continue;
                }
                *last = Some(snapshot.clone());
            }
            entry.listener.on_snapshot(snapshot);
        }
    }
}

/// In-memory document store implementing [`RemoteSource`].
///
/// Cheap to clone; clones share the same data and listeners.
#[derive(Clone)]
pub struct InMemorySource {
    inner: Arc<Inner>,
}

impl InMemorySource {
    /// Creates an empty, open source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: DashMap::new(),
                listeners: DashMap::new(),
                denied: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Inserts documents without going through [`RemoteSource::mutate`].
    ///
    /// Listeners of the collection are notified once after all documents are in.
    pub fn seed(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        let _delivery = self.inner.delivery.lock();
        {
            let mut coll = self.inner.collections.entry(collection.to_string()).or_default();
            for doc in docs {
                coll.insert(doc.id.clone(), doc);
            }
        }
        self.inner.notify_collection(collection);
    }

    /// Seeds collections from a JSON fixture of the form
    /// `{ "collection": [ { "id": "...", ...fields }, ... ], ... }`.
    ///
    /// Returns the number of documents loaded.
    ///
    /// # Errors
    ///
    /// Fails if the fixture is not an object of arrays or a document has no
    /// string `id`.
    pub fn seed_from_json(&self, fixture: serde_json::Value) -> anyhow::Result<usize> {
        let serde_json::Value::Object(collections) = fixture else {
            anyhow::bail!("fixture must be a JSON object keyed by collection name");
        };

        let mut loaded = 0;
        for (collection, docs) in collections {
            let serde_json::Value::Array(docs) = docs else {
                anyhow::bail!("fixture collection `{collection}` must be an array");
            };
            let docs = docs
                .into_iter()
                .enumerate()
                .map(|(i, raw)| {
                    Document::from_json(raw)
                        .with_context(|| format!("fixture document {collection}[{i}]"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            loaded += docs.len();
            self.seed(&collection, docs);
        }
        Ok(loaded)
    }

    /// Reads and seeds a JSON fixture file. See [`Self::seed_from_json`].
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, malformed JSON, or an invalid fixture shape.
    pub fn load_fixture(&self, path: &Path) -> anyhow::Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing fixture {}", path.display()))?;
        self.seed_from_json(value)
    }

    /// Terminates every live query on `collection` with `error`.
    ///
    /// Affected listeners receive `on_error` once and are unregistered, as a
    /// real backend drops a listener after a transport failure.
    pub fn fail_collection(&self, collection: &str, error: &SourceError) {
        let ids: Vec<u64> = self
            .inner
            .listeners
            .iter()
            .filter(|e| e.value().query.collection_name() == collection)
            .map(|e| *e.key())
            .collect();

        warn!(collection, listeners = ids.len(), %error, "failing live queries");
        for id in ids {
            if let Some((_, entry)) = self.inner.listeners.remove(&id) {
                entry.listener.on_error(error.clone());
            }
        }
    }

    /// Makes reads and registrations on `collection` fail with `error`.
    pub fn deny_collection(&self, collection: &str, error: SourceError) {
        self.inner.denied.insert(collection.to_string(), error);
    }

    /// Lifts a previous [`Self::deny_collection`].
    pub fn allow_collection(&self, collection: &str) {
        self.inner.denied.remove(collection);
    }

    /// Closes the source: every live query fails with `Unavailable` and all
    /// later calls are refused.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let error = SourceError::Unavailable("source is closed".to_string());
        let ids: Vec<u64> = self.inner.listeners.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.inner.listeners.remove(&id) {
                entry.listener.on_error(error.clone());
            }
        }
    }

    /// Number of registered live queries.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Number of documents currently stored in `collection`.
    #[must_use]
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map_or(0, |c| c.len())
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySource")
            .field("collections", &self.inner.collections.len())
            .field("listeners", &self.inner.listeners.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Registration handle returned by [`InMemorySource::subscribe`].
struct MemorySubscription {
    id: u64,
    source: Weak<Inner>,
}

impl SourceSubscription for MemorySubscription {
    fn cancel(&self) {
        if let Some(inner) = self.source.upgrade() {
            if inner.listeners.remove(&self.id).is_some() {
                debug!(listener = self.id, "memory listener removed");
            }
        }
    }
}

#[async_trait]
impl RemoteSource for InMemorySource {
    async fn get(&self, query: &Query) -> Result<Snapshot, SourceError> {
        self.inner.check_open(query.collection_name())?;
        Ok(self.inner.evaluate(query))
    }

    fn subscribe(
        &self,
        query: &Query,
        listener: Arc<dyn SnapshotListener>,
    ) -> Result<Box<dyn SourceSubscription>, SourceError> {
        self.inner.check_open(query.collection_name())?;

        let _delivery = self.inner.delivery.lock();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let initial = self.inner.evaluate(query);
        let entry = Arc::new(ListenerEntry {
            query: query.clone(),
            listener: Arc::clone(&listener),
            last: Mutex::new(Some(initial.clone())),
        });
        self.inner.listeners.insert(id, entry);
        debug!(listener = id, %query, "memory listener registered");

        listener.on_snapshot(initial);

        Ok(Box::new(MemorySubscription {
            id,
            source: Arc::downgrade(&self.inner),
        }))
    }

    async fn mutate(&self, mutation: Mutation) -> Result<(), SourceError> {
        let collection = mutation.collection().to_string();
        self.inner.check_open(&collection)?;

        let _delivery = self.inner.delivery.lock();
        {
            let mut coll = self.inner.collections.entry(collection.clone()).or_default();
            match mutation {
                Mutation::Upsert { document, .. } => {
                    coll.insert(document.id.clone(), document);
                }
                Mutation::Patch { id, fields, .. } => match coll.get_mut(&id) {
                    Some(doc) => doc.merge(fields),
                    None => {
                        return Err(SourceError::Internal(format!(
                            "no document `{id}` in `{collection}` to patch"
                        )))
                    }
                },
                Mutation::Delete { id, .. } => {
                    coll.remove(&id);
                }
            }
        }
        self.inner.notify_collection(&collection);
        Ok(())
    }
}
