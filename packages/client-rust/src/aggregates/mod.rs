//! Built-in aggregates: unread badge counters and the grade summary.

pub mod grades;
pub mod unread;

pub use grades::{GradeAggregate, GradeSummary};
pub use unread::{Tally, UnreadAggregate, UnreadCounts, UnreadFeed};
