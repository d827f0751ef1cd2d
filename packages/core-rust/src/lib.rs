//! `SchoolSync` Core: document model, queries, grade resolution, and role routing.
//!
//! Everything in this crate is pure and synchronous; the reactive machinery
//! that feeds it lives in `schoolsync-client`.

pub mod document;
pub mod query;
pub mod role;
pub mod schema;
pub mod snapshot;
pub mod traits;
pub mod types;

pub use document::{Document, DocumentError};
pub use query::{Filter, FilterOp, OrderBy, Query, QueryKey, SortDirection};
pub use role::{Destination, Profile, Role, Section};
pub use schema::{GradeFields, GradeShape, GradedItem, SchemaResolver};
pub use snapshot::Snapshot;
pub use traits::ProfileStore;
pub use types::{SubjectId, Value};
