//! Criteria evaluation for in-memory document filtering.
//!
//! Criteria documents are parsed into [`Expr`] trees and evaluated against each stored
//! document. Paths are dotted; a comparison against a field holding an array matches
//! when any element satisfies it.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docmodel_core::{
    criteria::{Expr, FieldOp, QueryVisitor},
    error::{DocumentStoreError, DocumentStoreResult},
    value::lookup,
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    ObjectId(ObjectId),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Comparable<'_> {
    /// Rank of the value's type in a mixed-type sort. Missing and null sort first.
    fn type_rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.type_rank().cmp(&other.type_rank()))
    }

    /// Equality, or membership when `self` is an array.
    fn matches(&self, value: &Comparable<'_>) -> bool {
        match self {
            Comparable::Array(items) if !matches!(value, Comparable::Array(_)) => {
                items.iter().any(|item| item == value)
            }
            _ => self == value,
        }
    }

    fn compare_with(&self, value: &Comparable<'_>, accept: fn(Ordering) -> bool) -> bool {
        match self {
            Comparable::Array(items) => items
                .iter()
                .any(|item| item.partial_cmp(value).is_some_and(accept)),
            _ => self.partial_cmp(value).is_some_and(accept),
        }
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Keeps the documents matching `expr`, in order.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        expr: &Expr,
    ) -> DocumentStoreResult<Vec<&'a Document>> {
        let mut matched = Vec::new();
        for doc in documents {
            if DocumentEvaluator::new(doc).evaluate(expr)? {
                matched.push(doc);
            }
        }
        Ok(matched)
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let expected = Comparable::from(value);

        let Some(field_value) = lookup(self.document, field) else {
            // A missing field equals null and differs from everything else.
            return Ok(match op {
                FieldOp::Eq => expected == Comparable::Null,
                FieldOp::Ne => expected != Comparable::Null,
                FieldOp::AnyOf => matches!(&expected, Comparable::Array(values) if values.contains(&Comparable::Null)),
                FieldOp::NoneOf => !matches!(&expected, Comparable::Array(values) if values.contains(&Comparable::Null)),
                _ => false,
            });
        };
        let actual = Comparable::from(field_value);

        Ok(match op {
            FieldOp::Eq => actual.matches(&expected),
            FieldOp::Ne => !actual.matches(&expected),
            FieldOp::Gt => actual.compare_with(&expected, |o| o == Ordering::Greater),
            FieldOp::Gte => actual.compare_with(&expected, |o| o != Ordering::Less),
            FieldOp::Lt => actual.compare_with(&expected, |o| o == Ordering::Less),
            FieldOp::Lte => actual.compare_with(&expected, |o| o != Ordering::Greater),
            FieldOp::AnyOf => match &expected {
                Comparable::Array(values) => values.iter().any(|candidate| actual.matches(candidate)),
                _ => false,
            },
            FieldOp::NoneOf => match &expected {
                Comparable::Array(values) => !values.iter().any(|candidate| actual.matches(candidate)),
                _ => true,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(doc: &Document, criteria: Document) -> bool {
        let expr = Expr::parse(&criteria).expect("parses");
        DocumentEvaluator::new(doc).evaluate(&expr).expect("evaluates")
    }

    #[test]
    fn compares_numbers_across_types() {
        let doc = doc! { "age": 30_i64, "score": 2.5 };

        assert!(matches(&doc, doc! { "age": 30 }));
        assert!(matches(&doc, doc! { "age": { "$gte": 30.0, "$lt": 31 } }));
        assert!(!matches(&doc, doc! { "score": { "$gt": 3 } }));
    }

    #[test]
    fn equality_matches_array_elements() {
        let doc = doc! { "tags": ["rust", "db"] };

        assert!(matches(&doc, doc! { "tags": "db" }));
        assert!(matches(&doc, doc! { "tags": { "$in": ["go", "rust"] } }));
        assert!(matches(&doc, doc! { "tags": { "$nin": ["go"] } }));
        assert!(matches(&doc, doc! { "tags": ["rust", "db"] }));
        assert!(!matches(&doc, doc! { "tags": "go" }));
    }

    #[test]
    fn missing_fields() {
        let doc = doc! { "name": "ada" };

        assert!(matches(&doc, doc! { "deleted": Bson::Null }));
        assert!(matches(&doc, doc! { "deleted": { "$ne": true } }));
        assert!(matches(&doc, doc! { "deleted": { "$nin": [true] } }));
        assert!(matches(&doc, doc! { "deleted": { "$exists": false } }));
        assert!(!matches(&doc, doc! { "deleted": { "$in": [true] } }));
        assert!(!matches(&doc, doc! { "deleted": { "$gt": 0 } }));
    }

    #[test]
    fn dotted_paths_and_object_ids() {
        let id = ObjectId::new();
        let doc = doc! { "author": { "id": id, "name": "ada" } };

        assert!(matches(&doc, doc! { "author.id": id }));
        assert!(matches(&doc, doc! { "author.id": { "$in": [id] } }));
        assert!(!matches(&doc, doc! { "author.id": ObjectId::new() }));
    }

    #[test]
    fn logical_operators() {
        let doc = doc! { "role": "admin", "active": false };

        assert!(matches(&doc, doc! { "$or": [{ "role": "user" }, { "active": false }] }));
        assert!(!matches(&doc, doc! { "$and": [{ "role": "admin" }, { "active": true }] }));
        assert!(matches(&doc, doc! {}));
    }

    #[test]
    fn sorts_mixed_types_with_nulls_first() {
        let null = Bson::Null;
        let one = Bson::Int32(1);
        let text = Bson::String("a".into());

        assert_eq!(Comparable::from(&null).sort_cmp(&Comparable::from(&one)), Ordering::Less);
        assert_eq!(Comparable::from(&text).sort_cmp(&Comparable::from(&one)), Ordering::Greater);
    }
}
