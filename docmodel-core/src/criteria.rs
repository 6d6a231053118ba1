//! Criteria construction and parsing.
//!
//! Criteria are plain BSON documents in the familiar operator syntax
//! (`{ "age": { "$gt": 18 } }`). This module provides an expression tree over that
//! syntax, a typed builder for it, and a visitor used both to write expressions back
//! out as criteria documents and by backends that evaluate criteria themselves.
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides static methods for building filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Existence: `exists`, `not_exists`
//! - Membership: `any_of`, `none_of`
//! - Logical: `and`, `or`
//!
//! ```ignore
//! use docmodel::criteria::Filter;
//!
//! let criteria = Filter::eq("status", "draft")
//!     .and(Filter::gt("score", 3))
//!     .to_criteria()?;
//! ```

use bson::{Bson, Document, doc};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Numeric form used in sort documents.
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sort {
    /// A single field name passed through untouched, sorted ascending.
    Raw(String),
    /// Fields in order of precedence.
    Fields(Vec<(String, SortDirection)>),
}

impl Sort {
    /// Fields in order of precedence, with a raw field sorted ascending.
    pub fn keys(&self) -> Vec<(String, SortDirection)> {
        match self {
            Sort::Raw(field) => vec![(field.clone(), SortDirection::Asc)],
            Sort::Fields(fields) => fields.clone(),
        }
    }

    /// The sort as a document of `field: 1 | -1` pairs.
    pub fn to_document(&self) -> Document {
        self.keys()
            .into_iter()
            .map(|(field, direction)| (field, Bson::Int32(direction.as_i32())))
            .collect()
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to. Matches an element when the field holds an array.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Field equals any of the listed values (`$in`).
    AnyOf,
    /// Field equals none of the listed values (`$nin`).
    NoneOf,
}

impl FieldOp {
    /// The criteria operator keyword for this comparison.
    pub fn keyword(&self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::AnyOf => "$in",
            FieldOp::NoneOf => "$nin",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::AnyOf,
            "$nin" => FieldOp::NoneOf,
            _ => return None,
        })
    }
}

/// A filter expression over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions. An empty list matches everything.
    And(Vec<Expr>),
    /// Logical OR of multiple expressions.
    Or(Vec<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The dotted path of the field to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Writes the expression out as a criteria document.
    pub fn to_criteria(&self) -> DocumentStoreResult<Document> {
        CriteriaWriter.visit_expr(self)
    }

    /// Parses a criteria document.
    ///
    /// Top-level keys are combined with AND. A field whose value is a document made of
    /// operator keys is parsed as those comparisons; any other value is an implicit
    /// equality. Unsupported operators are rejected with
    /// [`DocumentStoreError::InvalidQuery`].
    pub fn parse(criteria: &Document) -> DocumentStoreResult<Expr> {
        let mut exprs = Vec::with_capacity(criteria.len());

        for (key, value) in criteria {
            match key.as_str() {
                "$and" | "$or" => {
                    let Bson::Array(items) = value else {
                        return Err(DocumentStoreError::InvalidQuery(format!(
                            "{key} expects an array of criteria"
                        )));
                    };

                    let parsed = items
                        .iter()
                        .map(|item| match item {
                            Bson::Document(inner) => Expr::parse(inner),
                            _ => Err(DocumentStoreError::InvalidQuery(format!(
                                "{key} expects an array of criteria"
                            ))),
                        })
                        .collect::<DocumentStoreResult<Vec<_>>>()?;

                    exprs.push(if key == "$and" {
                        Expr::And(parsed)
                    } else {
                        Expr::Or(parsed)
                    });
                }
                _ if key.starts_with('$') => {
                    return Err(DocumentStoreError::InvalidQuery(format!(
                        "unsupported operator {key}"
                    )));
                }
                _ => Self::parse_field(key, value, &mut exprs)?,
            }
        }

        Ok(match exprs.len() {
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        })
    }

    fn parse_field(field: &str, value: &Bson, exprs: &mut Vec<Expr>) -> DocumentStoreResult<()> {
        let operators = match value {
            Bson::Document(inner) if !inner.is_empty() && inner.keys().all(|k| k.starts_with('$')) => inner,
            _ => {
                exprs.push(Expr::field(field.to_string(), FieldOp::Eq, value.clone()));
                return Ok(());
            }
        };

        for (keyword, operand) in operators {
            if keyword == "$exists" {
                exprs.push(Expr::Exists(field.to_string(), crate::value::is_truthy(operand)));
                continue;
            }

            let op = FieldOp::from_keyword(keyword).ok_or_else(|| {
                DocumentStoreError::InvalidQuery(format!("unsupported operator {keyword}"))
            })?;

            if matches!(op, FieldOp::AnyOf | FieldOp::NoneOf) && !matches!(operand, Bson::Array(_)) {
                return Err(DocumentStoreError::InvalidQuery(format!(
                    "{keyword} expects an array"
                )));
            }

            exprs.push(Expr::field(field.to_string(), op, operand.clone()));
        }

        Ok(())
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field is present.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is absent.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the given values.
    pub fn any_of<I, V>(field: impl Into<String>, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Expr::field(
            field.into(),
            FieldOp::AnyOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field equals none of the given values.
    pub fn none_of<I, V>(field: impl Into<String>, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Expr::field(
            field.into(),
            FieldOp::NoneOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

/// Writes expressions out as criteria documents.
pub struct CriteriaWriter;

impl QueryVisitor for CriteriaWriter {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(Document::new());
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let keyword = op.keyword();

        Ok(doc! {
            field: { keyword: value.clone() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_builder_expressions() {
        let criteria = Filter::eq("status", "draft")
            .and(Filter::any_of("tags", ["a", "b"]))
            .to_criteria()
            .expect("writes");

        assert_eq!(
            criteria,
            doc! { "$and": [
                { "status": { "$eq": "draft" } },
                { "tags": { "$in": ["a", "b"] } },
            ] }
        );
    }

    #[test]
    fn parses_implicit_equality_and_operators() {
        let parsed = Expr::parse(&doc! {
            "name": "ada",
            "age": { "$gte": 18, "$lt": 65 },
            "$or": [{ "role": "admin" }, { "deleted": { "$exists": false } }],
        })
        .expect("parses");

        assert_eq!(
            parsed,
            Expr::And(vec![
                Filter::eq("name", "ada"),
                Filter::gte("age", 18),
                Filter::lt("age", 65),
                Expr::Or(vec![Filter::eq("role", "admin"), Filter::not_exists("deleted")]),
            ])
        );
    }

    #[test]
    fn rejects_unknown_operators() {
        assert!(matches!(
            Expr::parse(&doc! { "name": { "$regex": "^a" } }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            Expr::parse(&doc! { "$where": "1" }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
    }

    #[test]
    fn embedded_documents_compare_by_value() {
        let parsed = Expr::parse(&doc! { "address": { "city": "Oslo" } }).expect("parses");
        assert_eq!(parsed, Filter::eq("address", doc! { "city": "Oslo" }));
        assert_eq!(Expr::parse(&doc! {}).expect("parses"), Expr::And(vec![]));
    }
}
