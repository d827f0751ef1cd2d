//! Structural descriptions of which remote documents to read or watch.
//!
//! A [`Query`] names a collection plus AND-ed filter predicates, an optional
//! ordering and an optional limit. Two queries are equal when their content is
//! equal, regardless of the order in which filters were added; [`QueryKey`] is
//! the hashable canonical form used for de-duplication.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::types::Value;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Comparison operator of a single filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Field equals the value.
    Eq,
    /// Field differs from the value, or is missing.
    Neq,
    /// Field is greater than the value.
    Gt,
    /// Field is greater than or equal to the value.
    Gte,
    /// Field is less than the value.
    Lt,
    /// Field is less than or equal to the value.
    Lte,
}

/// Sort direction for snapshot ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// One predicate over a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Top-level document field the predicate reads.
    pub field: String,
    /// Comparison applied between the field and `value`.
    pub op: FilterOp,
    /// Right-hand side of the comparison.
    pub value: Value,
}

impl Filter {
    /// Evaluates the predicate against a document.
    ///
    /// A missing field only satisfies `Neq`. Ordering operators compare
    /// numbers (`Int`/`Float` uniformly), strings and timestamps; values of
    /// incomparable kinds never match.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return self.op == FilterOp::Neq;
        };
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Neq => !values_equal(actual, &self.value),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Ordering clause applied to a snapshot before `limit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Immutable description of a remote result set.
///
/// Build with [`Query::collection`] and the chained filter helpers:
///
/// ```
/// use schoolsync_core::Query;
///
/// let q = Query::collection("notifications")
///     .where_eq("userId", "u1")
///     .where_eq("read", false);
/// assert_eq!(q.collection_name(), "notifications");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    collection: String,
    filters: Vec<Filter>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    order_by: Option<OrderBy>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    limit: Option<usize>,
}

impl Query {
    /// Starts a query over every document of `collection`.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    /// Orders the result set by one field.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Caps the result set after ordering.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns `true` if every filter matches (an empty filter list matches all).
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filters, orders and limits `docs` into the result set of this query.
    ///
    /// Without an ordering clause documents are returned sorted by id, so a
    /// source always produces the same snapshot for the same contents.
    pub fn evaluate<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).cloned().collect();
        match &self.order_by {
            Some(order) => out.sort_by(|a, b| compare_for_order(a, b, order)),
            None => out.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }

    /// Canonical, hashable form of this query.
    ///
    /// Filters are sorted before encoding so that filter insertion order does
    /// not affect identity. Values keep their variant in the encoding:
    /// `Timestamp(5)` and `Int(5)`, or `Float(NaN)` and `Null`, are different
    /// keys.
    #[must_use]
    pub fn key(&self) -> QueryKey {
        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| format!("{:?}\u{1f}{:?}\u{1f}{:?}", f.field, f.op, f.value))
            .collect();
        filters.sort();

        let mut key = self.collection.clone();
        for f in &filters {
            key.push('\u{1e}');
            key.push_str(f);
        }
        if let Some(order) = &self.order_by {
            key.push_str(&format!("\u{1e}order:{}:{:?}", order.field, order.direction));
        }
        if let Some(limit) = self.limit {
            key.push_str(&format!("\u{1e}limit:{limit}"));
        }
        QueryKey(key)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Query {}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)?;
        for (i, filter) in self.filters.iter().enumerate() {
            let sep = if i == 0 { " where " } else { " and " };
            write!(f, "{sep}{} {:?} {:?}", filter.field, filter.op, filter.value)?;
        }
        Ok(())
    }
}

/// Canonical identity of a [`Query`]; equal keys mean structurally equal queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Value comparison helpers
// ---------------------------------------------------------------------------

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_for_order(a: &Document, b: &Document, order: &OrderBy) -> Ordering {
    let ord = match (a.get(&order.field), b.get(&order.field)) {
        (Some(x), Some(y)) => {
            let o = compare_values(x, y).unwrap_or(Ordering::Equal);
            match order.direction {
                SortDirection::Asc => o,
                SortDirection::Desc => o.reverse(),
            }
        }
        // Missing fields sort last in either direction.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    ord.then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn doc(id: &str) -> Document {
        Document::new(id)
    }

    #[test]
    fn equality_ignores_filter_order() {
        let a = Query::collection("notifications")
            .where_eq("userId", "u1")
            .where_eq("read", false);
        let b = Query::collection("notifications")
            .where_eq("read", false)
            .where_eq("userId", "u1");
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());

        let mut set = HashSet::new();
        set.insert(a.key());
        set.insert(b.key());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn different_filter_values_are_different_queries() {
        let a = Query::collection("notifications").where_eq("userId", "u1");
        let b = Query::collection("notifications").where_eq("userId", "u2");
        let c = Query::collection("messages").where_eq("userId", "u1");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn value_variant_is_part_of_identity() {
        let at = |v: Value| Query::collection("events").where_eq("at", v);

        let ts = at(Value::Timestamp(5));
        let int = at(Value::Int(5));
        let stamped = doc("e").with("at", Value::Timestamp(5));
        assert!(ts.matches(&stamped));
        assert!(!int.matches(&stamped));
        assert_ne!(ts, int);
        assert_ne!(ts.key(), int.key());

        assert_ne!(at(Value::Float(f64::NAN)), at(Value::Null));
        assert_ne!(
            at(Value::Bytes(vec![1])),
            at(Value::Array(vec![Value::Int(1)]))
        );
        assert_ne!(at(Value::from("5")), at(Value::Int(5)));
    }

    #[test]
    fn equal_values_still_share_a_key() {
        let a = Query::collection("events").where_eq("at", Value::Timestamp(5));
        let b = Query::collection("events").where_eq("at", Value::Timestamp(5));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn int_and_float_filter_values_compare_numerically() {
        let q = Query::collection("grades").filter("term", FilterOp::Eq, 2_i64);
        assert!(q.matches(&doc("g").with("term", 2.0)));
        assert!(q.matches(&doc("g").with("term", 2_i64)));
        assert!(!q.matches(&doc("g").with("term", "2")));
    }

    #[test]
    fn missing_field_only_satisfies_neq() {
        let eq = Query::collection("c").where_eq("read", false);
        let neq = Query::collection("c").filter("read", FilterOp::Neq, true);
        let gt = Query::collection("c").filter("score", FilterOp::Gt, 1_i64);
        let empty = doc("x");
        assert!(!eq.matches(&empty));
        assert!(neq.matches(&empty));
        assert!(!gt.matches(&empty));
    }

    #[test]
    fn range_filters() {
        let d = doc("x").with("score", 4.5);
        assert!(Query::collection("c").filter("score", FilterOp::Gte, 4.5).matches(&d));
        assert!(Query::collection("c").filter("score", FilterOp::Lt, 5_i64).matches(&d));
        assert!(!Query::collection("c").filter("score", FilterOp::Lte, 4_i64).matches(&d));
        // Incomparable kinds never match ordering operators.
        assert!(!Query::collection("c").filter("score", FilterOp::Gt, "a").matches(&d));
    }

    #[test]
    fn evaluate_orders_and_limits() {
        let docs = vec![
            doc("a").with("sentAt", 3_i64),
            doc("b").with("sentAt", 1_i64),
            doc("c"),
            doc("d").with("sentAt", 2_i64),
        ];
        let q = Query::collection("messages")
            .order_by("sentAt", SortDirection::Desc)
            .limit(3);
        let ids: Vec<String> = q.evaluate(&docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "d", "b"]);
    }

    #[test]
    fn evaluate_without_order_sorts_by_id() {
        let docs = vec![doc("z"), doc("a"), doc("m")];
        let ids: Vec<String> = Query::collection("c")
            .evaluate(&docs)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn display_is_readable() {
        let q = Query::collection("notifications").where_eq("read", false);
        assert_eq!(q.to_string(), "notifications where read Eq Bool(false)");
    }
}
