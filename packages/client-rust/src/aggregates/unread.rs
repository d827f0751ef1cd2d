//! Unread badge counters.

use schoolsync_core::{Query, SubjectId};

use crate::config::{CollectionsConfig, FeedConfig};
use crate::error::SourceError;
use crate::source::SourceEvent;
use crate::store::Aggregate;

/// Field that marks a document as read.
pub const READ_FIELD: &str = "read";

/// One counter of an [`UnreadCounts`] badge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Tally {
    #[default]
    Loading,
    Count(usize),
    Failed(SourceError),
}

impl Tally {
    #[must_use]
    pub fn count(&self) -> Option<usize> {
        match self {
            Self::Count(n) => Some(*n),
            Self::Loading | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn error(&self) -> Option<&SourceError> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Loading | Self::Count(_) => None,
        }
    }

    fn from_event(event: &SourceEvent) -> Self {
        match event {
            SourceEvent::Snapshot(snapshot) => Self::Count(snapshot.size()),
            SourceEvent::Error(error) => Self::Failed(error.clone()),
        }
    }
}

/// Unread notifications and messages of one subject.
///
/// Each counter is owned by its own query; an update of one never touches
/// the other.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnreadCounts {
    pub notifications: Tally,
    pub messages: Tally,
}

impl UnreadCounts {
    /// Sum of the counters that are known.
    #[must_use]
    pub fn total(&self) -> usize {
        self.notifications.count().unwrap_or(0) + self.messages.count().unwrap_or(0)
    }

    /// True while either counter has not received its first event.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.notifications.is_loading() || self.messages.is_loading()
    }
}

/// Which counter an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadFeed {
    Notifications,
    Messages,
}

/// Folds unread-document snapshots into [`UnreadCounts`].
#[derive(Debug, Clone)]
pub struct UnreadAggregate {
    notifications: FeedConfig,
    messages: FeedConfig,
}

impl UnreadAggregate {
    #[must_use]
    pub fn new(notifications: FeedConfig, messages: FeedConfig) -> Self {
        Self {
            notifications,
            messages,
        }
    }

    #[must_use]
    pub fn from_config(collections: &CollectionsConfig) -> Self {
        Self::new(
            collections.notifications.clone(),
            collections.messages.clone(),
        )
    }

    fn unread_query(feed: &FeedConfig, subject: &SubjectId) -> Query {
        Query::collection(feed.collection.as_str())
            .where_eq(feed.owner_field.as_str(), subject.as_str())
            .where_eq(READ_FIELD, false)
    }
}

impl Default for UnreadAggregate {
    fn default() -> Self {
        Self::from_config(&CollectionsConfig::default())
    }
}

impl Aggregate for UnreadAggregate {
    type State = UnreadCounts;
    type Source = UnreadFeed;

    fn initial(&self) -> UnreadCounts {
        UnreadCounts::default()
    }

    fn fold(&self, state: &UnreadCounts, source: UnreadFeed, event: &SourceEvent) -> UnreadCounts {
        let mut next = state.clone();
        match source {
            UnreadFeed::Notifications => next.notifications = Tally::from_event(event),
            UnreadFeed::Messages => next.messages = Tally::from_event(event),
        }
        next
    }

    fn queries(&self, subject: &SubjectId) -> Vec<(UnreadFeed, Query)> {
        vec![
            (
                UnreadFeed::Notifications,
                Self::unread_query(&self.notifications, subject),
            ),
            (
                UnreadFeed::Messages,
                Self::unread_query(&self.messages, subject),
            ),
        ]
    }
}
