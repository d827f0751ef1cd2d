//! `SchoolSync` Client: live mirrors of remote collections and the aggregates
//! derived from them.
//!
//! A [`RemoteSource`] pushes snapshots, the [`SubscriptionManager`] owns the
//! live queries of each consumer, and an [`AggregateStore`] folds events
//! into an observable value. [`LiveBinding`] ties the three together for
//! one subject.

pub mod aggregates;
pub mod binding;
pub mod config;
pub mod error;
pub mod profile;
pub mod source;
pub mod store;
pub mod subscription;
pub mod telemetry;

pub use aggregates::{
    GradeAggregate, GradeSummary, Tally, UnreadAggregate, UnreadCounts, UnreadFeed,
};
pub use binding::LiveBinding;
pub use config::{ClientConfig, CollectionsConfig, FeedConfig, LogConfig, LogFormat};
pub use error::{ConfigError, SourceError};
pub use profile::JsonProfileStore;
pub use source::{
    InMemorySource, Mutation, RemoteSource, SnapshotListener, SourceEvent, SourceSubscription,
};
pub use store::{Aggregate, AggregateStore, Unsubscribe};
pub use subscription::{
    ConsumerId, EventStream, HandleId, SubscriptionHandle, SubscriptionManager, SubscriptionStatus,
};
