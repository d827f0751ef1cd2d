//! The remote document source consumed by the client.
//!
//! [`RemoteSource`] is the only legitimate origin of state updates. It offers
//! one-shot reads, live subscriptions that push full [`Snapshot`]s, and
//! fire-and-forget mutations. [`InMemorySource`] is the in-process
//! implementation used by tests and the demo binary.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schoolsync_core::{Document, Query, Snapshot, Value};

use crate::error::SourceError;

pub use memory::InMemorySource;

/// Event pushed to a subscription callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// The full current result set of the subscribed query.
    Snapshot(Snapshot),
    /// Terminal transport failure; no further events follow.
    Error(SourceError),
}

impl SourceEvent {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Receiver of snapshot and error notifications for one live query.
///
/// Used as `Arc<dyn SnapshotListener>`. Sources call it without holding
/// internal locks, so implementations may call back into the source.
pub trait SnapshotListener: Send + Sync {
    /// Called with every changed result set, starting with the initial one.
    fn on_snapshot(&self, snapshot: Snapshot);

    /// Called at most once when the source gives up on the query.
    fn on_error(&self, error: SourceError);
}

/// A live registration with a source. Cancelling is idempotent.
pub trait SourceSubscription: Send + Sync {
    fn cancel(&self);
}

/// Write request forwarded to the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert or fully replace a document.
    Upsert { collection: String, document: Document },
    /// Merge fields into an existing document.
    Patch {
        collection: String,
        id: String,
        fields: BTreeMap<String, Value>,
    },
    /// Remove a document.
    Delete { collection: String, id: String },
}

impl Mutation {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Upsert { collection, .. }
            | Self::Patch { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    /// Convenience for the common "mark as read" patch.
    pub fn mark_read(collection: impl Into<String>, id: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("read".to_string(), Value::Bool(true));
        Self::Patch {
            collection: collection.into(),
            id: id.into(),
            fields,
        }
    }
}

/// Opaque remote document store.
///
/// Identity is an opaque precondition: queries carry the subject id in their
/// filters and the source enforces whatever access rules it has.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// One-shot read of the current result set.
    async fn get(&self, query: &Query) -> Result<Snapshot, SourceError>;

    /// Starts a live query. The initial snapshot is delivered right after
    /// registration; later snapshots follow every change of the result set.
    ///
    /// # Errors
    ///
    /// Returns an error when the source refuses the registration outright.
    fn subscribe(
        &self,
        query: &Query,
        listener: Arc<dyn SnapshotListener>,
    ) -> Result<Box<dyn SourceSubscription>, SourceError>;

    /// Forwards a write. Callers may ignore the result.
    async fn mutate(&self, mutation: Mutation) -> Result<(), SourceError>;
}
