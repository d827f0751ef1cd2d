//! Weighted grade summary over a student's grade documents.

use std::collections::BTreeMap;

use schoolsync_core::{GradeFields, Query, SchemaResolver, Snapshot, SubjectId};

use crate::config::{CollectionsConfig, FeedConfig};
use crate::error::SourceError;
use crate::source::SourceEvent;
use crate::store::Aggregate;

/// Derived academic average.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GradeSummary {
    #[default]
    Loading,
    Ready {
        /// Mean of the resolved per-document grades, `None` if none resolved.
        weighted_average: Option<f64>,
        /// Resolved grade per document id.
        per_document: BTreeMap<String, f64>,
        /// Documents whose shape was not recognized.
        unresolved: usize,
    },
    Failed(SourceError),
}

impl GradeSummary {
    /// Summarizes `snapshot` with `resolver`.
    #[must_use]
    pub fn from_snapshot(resolver: &SchemaResolver, snapshot: &Snapshot) -> Self {
        let mut per_document = BTreeMap::new();
        let mut unresolved = 0;
        for doc in snapshot {
            match resolver.resolve(doc) {
                Some(grade) => {
                    per_document.insert(doc.id.clone(), grade);
                }
                None => unresolved += 1,
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let weighted_average = if per_document.is_empty() {
            None
        } else {
            Some(per_document.values().sum::<f64>() / per_document.len() as f64)
                .filter(|v| v.is_finite())
        };

        Self::Ready {
            weighted_average,
            per_document,
            unresolved,
        }
    }

    /// The overall average, if ready and at least one document resolved.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        match self {
            Self::Ready {
                weighted_average, ..
            } => *weighted_average,
            Self::Loading | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// Folds grade snapshots into a [`GradeSummary`].
#[derive(Debug, Clone)]
pub struct GradeAggregate {
    feed: FeedConfig,
    resolver: SchemaResolver,
}

impl GradeAggregate {
    #[must_use]
    pub fn new(feed: FeedConfig, fields: GradeFields) -> Self {
        Self {
            feed,
            resolver: SchemaResolver::new(fields),
        }
    }

    #[must_use]
    pub fn from_config(collections: &CollectionsConfig, fields: &GradeFields) -> Self {
        Self::new(collections.grades.clone(), fields.clone())
    }

    #[must_use]
    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }
}

impl Default for GradeAggregate {
    fn default() -> Self {
        Self::from_config(&CollectionsConfig::default(), &GradeFields::default())
    }
}

impl Aggregate for GradeAggregate {
    type State = GradeSummary;
    type Source = ();

    fn initial(&self) -> GradeSummary {
        GradeSummary::Loading
    }

    fn fold(&self, _state: &GradeSummary, _source: (), event: &SourceEvent) -> GradeSummary {
        match event {
            SourceEvent::Snapshot(snapshot) => GradeSummary::from_snapshot(&self.resolver, snapshot),
            SourceEvent::Error(error) => GradeSummary::Failed(error.clone()),
        }
    }

    fn queries(&self, subject: &SubjectId) -> Vec<((), Query)> {
        vec![(
            (),
            Query::collection(self.feed.collection.as_str())
                .where_eq(self.feed.owner_field.as_str(), subject.as_str()),
        )]
    }
}
