//! Grade resolution over heterogeneous grade documents.
//!
//! Grade documents arrive in several shapes depending on which client wrote
//! them. [`SchemaResolver::classify`] maps a document onto one [`GradeShape`]
//! using a fixed precedence, and [`SchemaResolver::resolve`] turns the shape
//! into a single number:
//!
//! 1. **Itemized**: a nested mapping of graded items, each with a numeric grade
//!    and weight. Resolves to `Σ grade_i * weight_i`; weights are used as given.
//! 2. **Final**: a precomputed final-grade field. Resolves to that value.
//! 3. **Plain**: one or more plain numeric grade fields under alternate names.
//!    Resolves to their arithmetic mean.
//! 4. **Unrecognized**: resolves to `None`, which is distinct from `0.0`.
//!
//! The first matching tier wins; values are never blended across tiers.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::types::Value;

/// Field-name catalogue used to recognise each grade shape.
///
/// Every list is checked in order; the first present name wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GradeFields {
    /// Names of the nested mapping that holds graded items.
    pub items: Vec<String>,
    /// Names of the grade field inside an item.
    pub item_grade: Vec<String>,
    /// Names of the weight field inside an item.
    pub item_weight: Vec<String>,
    /// Names of a precomputed final grade.
    pub final_grade: Vec<String>,
    /// Alternate names of a plain grade value.
    pub plain: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl Default for GradeFields {
    fn default() -> Self {
        Self {
            items: names(&["items", "evaluations", "notas"]),
            item_grade: names(&["grade", "nota", "score"]),
            item_weight: names(&["weight", "peso", "percentage"]),
            final_grade: names(&["finalGrade", "final_grade", "notaFinal"]),
            plain: names(&["grade", "nota", "score", "calificacion"]),
        }
    }
}

/// One weighted item of an itemized grade document.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedItem {
    /// Key of the item inside the items mapping (or its list index).
    pub id: String,
    /// Numeric grade of the item.
    pub grade: f64,
    /// Weight applied to `grade`, used as given.
    pub weight: f64,
}

/// The recognised shape of a grade document.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeShape {
    /// Tier 1: individually weighted items (never empty).
    Itemized(Vec<GradedItem>),
    /// Tier 2: a precomputed final grade.
    Final(f64),
    /// Tier 3: plain grade values under alternate names (never empty).
    Plain(Vec<f64>),
    /// No numeric signal.
    Unrecognized,
}

impl GradeShape {
    /// Collapses the shape into a single grade.
    ///
    /// A sum or mean that overflows to a non-finite value is absent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self) -> Option<f64> {
        let value = match self {
            Self::Itemized(items) => Some(items.iter().map(|i| i.grade * i.weight).sum()),
            Self::Final(v) => Some(*v),
            Self::Plain(values) if !values.is_empty() => {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
            Self::Plain(_) | Self::Unrecognized => None,
        };
        value.filter(|v| v.is_finite())
    }

    /// Short label of the tier, used in log fields.
    #[must_use]
    pub fn tier(&self) -> &'static str {
        match self {
            Self::Itemized(_) => "itemized",
            Self::Final(_) => "final",
            Self::Plain(_) => "plain",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Maps grade documents onto a [`GradeShape`] and a resolved grade.
#[derive(Debug, Clone, Default)]
pub struct SchemaResolver {
    fields: GradeFields,
}

impl SchemaResolver {
    #[must_use]
    pub fn new(fields: GradeFields) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &GradeFields {
        &self.fields
    }

    /// Classifies `doc` by the first matching tier.
    #[must_use]
    pub fn classify(&self, doc: &Document) -> GradeShape {
        let items = self.itemized(doc);
        if !items.is_empty() {
            return GradeShape::Itemized(items);
        }

        if let Some(v) = first_number(doc, &self.fields.final_grade) {
            return GradeShape::Final(v);
        }

        let plain: Vec<f64> = self
            .fields
            .plain
            .iter()
            .filter_map(|name| doc.get(name).and_then(Value::as_f64))
            .collect();
        if !plain.is_empty() {
            return GradeShape::Plain(plain);
        }

        GradeShape::Unrecognized
    }

    /// Resolves `doc` to a single grade, or `None` when no tier matches.
    #[must_use]
    pub fn resolve(&self, doc: &Document) -> Option<f64> {
        let shape = self.classify(doc);
        let value = shape.value();
        tracing::trace!(doc = %doc.id, tier = shape.tier(), ?value, "resolved grade");
        value
    }

    /// Collects usable items from the first items field that holds a mapping
    /// (or a list) of item maps. Items without a numeric grade and weight are
    /// skipped.
    fn itemized(&self, doc: &Document) -> Vec<GradedItem> {
        for name in &self.fields.items {
            let entries: Vec<(String, &Value)> = match doc.get(name) {
                Some(Value::Map(map)) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
                Some(Value::Array(list)) => list
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
                _ => continue,
            };

            let items: Vec<GradedItem> = entries
                .into_iter()
                .filter_map(|(id, value)| {
                    let item = value.as_map()?;
                    let grade = first_number_in(item, &self.fields.item_grade)?;
                    let weight = first_number_in(item, &self.fields.item_weight)?;
                    Some(GradedItem { id, grade, weight })
                })
                .collect();
            if !items.is_empty() {
                return items;
            }
        }
        Vec::new()
    }
}

/// Resolves `doc` with the default field catalogue.
#[must_use]
pub fn resolve(doc: &Document) -> Option<f64> {
    SchemaResolver::default().resolve(doc)
}

fn first_number(doc: &Document, names: &[String]) -> Option<f64> {
    names.iter().find_map(|n| doc.get(n).and_then(Value::as_f64))
}

fn first_number_in(
    map: &std::collections::BTreeMap<String, Value>,
    names: &[String],
) -> Option<f64> {
    names.iter().find_map(|n| map.get(n).and_then(Value::as_f64))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    fn item(grade: f64, weight: f64) -> Value {
        let mut m = BTreeMap::new();
        m.insert("grade".to_string(), Value::Float(grade));
        m.insert("weight".to_string(), Value::Float(weight));
        Value::Map(m)
    }

    fn items(list: &[(&str, f64, f64)]) -> Value {
        let mut m = BTreeMap::new();
        for (id, g, w) in list {
            m.insert((*id).to_string(), item(*g, *w));
        }
        Value::Map(m)
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let v = actual.expect("expected a resolved grade");
        assert!((v - expected).abs() < 1e-9, "expected {expected}, got {v}");
    }

    #[test]
    fn itemized_weights_are_summed_without_renormalizing() {
        let doc = Document::new("g1").with("items", items(&[("a", 4.0, 0.4), ("b", 5.0, 0.6)]));
        assert_close(resolve(&doc), 4.6);
    }

    #[test]
    fn final_grade_is_returned_verbatim() {
        let doc = Document::new("g1").with("finalGrade", 3.7);
        assert_eq!(resolve(&doc), Some(3.7));
    }

    #[test]
    fn plain_fields_are_averaged() {
        let doc = Document::new("g1").with("nota", 4.0).with("grade", 5.0);
        assert_close(resolve(&doc), 4.5);
    }

    #[test]
    fn single_plain_field_is_its_own_mean() {
        let doc = Document::new("g1").with("score", 3_i64);
        assert_eq!(resolve(&doc), Some(3.0));
    }

    #[test]
    fn itemized_wins_over_final_grade() {
        let doc = Document::new("g1")
            .with("items", items(&[("a", 4.0, 0.4), ("b", 5.0, 0.6)]))
            .with("finalGrade", 1.0);
        let resolver = SchemaResolver::default();
        assert!(matches!(resolver.classify(&doc), GradeShape::Itemized(_)));
        assert_close(resolver.resolve(&doc), 4.6);
    }

    #[test]
    fn final_grade_wins_over_plain_fields() {
        let doc = Document::new("g1").with("finalGrade", 3.7).with("nota", 1.0);
        assert_eq!(resolve(&doc), Some(3.7));
    }

    #[test]
    fn empty_document_is_absent_not_zero() {
        let doc = Document::new("g1");
        assert_eq!(SchemaResolver::default().classify(&doc), GradeShape::Unrecognized);
        assert_eq!(resolve(&doc), None);
    }

    #[test]
    fn malformed_items_fall_through_to_next_tier() {
        let mut broken = BTreeMap::new();
        broken.insert("a".to_string(), Value::from("not an item"));
        let mut no_weight = BTreeMap::new();
        no_weight.insert("grade".to_string(), Value::Float(4.0));
        broken.insert("b".to_string(), Value::Map(no_weight));

        let doc = Document::new("g1")
            .with("items", Value::Map(broken))
            .with("finalGrade", 3.2);
        assert_eq!(resolve(&doc), Some(3.2));
    }

    #[test]
    fn non_numeric_values_are_ignored() {
        let doc = Document::new("g1")
            .with("finalGrade", "A+")
            .with("grade", Value::Null)
            .with("nota", 4.0);
        assert_eq!(resolve(&doc), Some(4.0));

        let none = Document::new("g2").with("grade", "five").with("items", 3_i64);
        assert_eq!(resolve(&none), None);
    }

    #[test]
    fn items_may_be_a_list() {
        let doc = Document::new("g1").with(
            "evaluations",
            Value::Array(vec![item(3.0, 0.5), item(5.0, 0.5)]),
        );
        assert_close(resolve(&doc), 4.0);
    }

    #[test]
    fn alternate_item_field_names() {
        let mut it = BTreeMap::new();
        it.insert("nota".to_string(), Value::Float(5.0));
        it.insert("peso".to_string(), Value::Float(0.2));
        let mut list = BTreeMap::new();
        list.insert("quiz".to_string(), Value::Map(it));
        let doc = Document::new("g1").with("notas", Value::Map(list));
        assert_close(resolve(&doc), 1.0);
    }

    #[test]
    fn custom_catalogue_changes_recognised_names() {
        let fields = GradeFields {
            plain: vec!["mark".to_string()],
            ..GradeFields::default()
        };
        let resolver = SchemaResolver::new(fields);
        let doc = Document::new("g1").with("mark", 2.0).with("nota", 5.0);
        assert_eq!(resolver.resolve(&doc), Some(2.0));
    }

    #[test]
    fn grade_fields_deserialize_with_defaults() {
        let fields: GradeFields =
            serde_json::from_str(r#"{"plain": ["mark"]}"#).expect("decode");
        assert_eq!(fields.plain, vec!["mark".to_string()]);
        assert_eq!(fields.final_grade, GradeFields::default().final_grade);
    }

    #[test]
    fn overflowing_weighted_sum_is_absent() {
        let doc = Document::new("g1").with(
            "items",
            items(&[("a", 1e308, 10.0), ("b", -1e308, 10.0)]),
        );
        let shape = SchemaResolver::default().classify(&doc);
        assert_eq!(shape.tier(), "itemized");
        assert_eq!(shape.value(), None);
        assert_eq!(resolve(&doc), None);
    }

    #[test]
    fn overflowing_plain_mean_is_absent() {
        let doc = Document::new("g1").with("grade", 1.5e308).with("nota", 1.5e308);
        assert_eq!(resolve(&doc), None);
    }

    proptest! {
        #[test]
        fn plain_tier_is_the_arithmetic_mean(a in 0.0f64..10.0, b in 0.0f64..10.0, c in 0.0f64..10.0) {
            let doc = Document::new("p")
                .with("grade", a)
                .with("nota", b)
                .with("calificacion", c);
            let v = resolve(&doc).expect("resolved");
            prop_assert!((v - (a + b + c) / 3.0).abs() < 1e-9);
        }

        #[test]
        fn itemized_tier_is_the_weighted_sum(
            pairs in proptest::collection::vec((0.0f64..10.0, 0.0f64..1.0), 1..8),
            final_grade in 0.0f64..10.0,
        ) {
            let mut m = BTreeMap::new();
            for (i, (g, w)) in pairs.iter().enumerate() {
                m.insert(format!("item{i:02}"), item(*g, *w));
            }
            let doc = Document::new("p")
                .with("items", Value::Map(m))
                .with("finalGrade", final_grade);
            let expected: f64 = pairs.iter().map(|(g, w)| g * w).sum();
            let v = resolve(&doc).expect("resolved");
            prop_assert!((v - expected).abs() < 1e-9);
        }
    }
}
