//! Filter predicate AST.
//!
//! # Responsibility
//! - Represent specification criteria as plain data that can be composed
//!   (`and`, `or`, `not`), compared and fingerprinted.
//! - Render criteria to parameterized SQL against an entity descriptor.
//!
//! # Invariants
//! - Field names are resolved against the descriptor at render time; an
//!   unknown field is a mapping error and no SQL is produced.
//! - Values are always bound as parameters, never spliced into SQL text.

use crate::db::value::{json_to_sql, timestamp_json};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::EntityDescriptor;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::{Number, Value as JsonValue};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Literal operand of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl FilterValue {
    fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(flag) => JsonValue::Bool(*flag),
            Self::Integer(number) => JsonValue::from(*number),
            Self::Real(number) => Number::from_f64(*number)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(text) => JsonValue::String(text.clone()),
            Self::Timestamp(at) => timestamp_json(at),
        }
    }
}

impl Display for FilterValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Integer(number) => write!(f, "{number}"),
            // Debug keeps the fraction so `50` and `50.0` stay distinct.
            Self::Real(number) => write!(f, "{number:?}"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Timestamp(at) => write!(f, "@{}", at.to_rfc3339()),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean predicate over one entity's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: FilterValue,
    },
    Like {
        field: String,
        pattern: String,
    },
    In {
        field: String,
        values: Vec<FilterValue>,
    },
    IsNull(String),
    NotNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

/// Starts a predicate on `name`: `field("price").gt(50)`.
pub fn field(name: impl Into<String>) -> FieldRef {
    FieldRef { name: name.into() }
}

/// Column reference used to build comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    name: String,
}

impl FieldRef {
    fn compare(self, op: CompareOp, value: impl Into<FilterValue>) -> Filter {
        Filter::Compare {
            field: self.name,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<FilterValue>) -> Filter {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<FilterValue>) -> Filter {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<FilterValue>) -> Filter {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<FilterValue>) -> Filter {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<FilterValue>) -> Filter {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<FilterValue>) -> Filter {
        self.compare(CompareOp::Ge, value)
    }

    /// SQL `LIKE` with `%`/`_` wildcards.
    pub fn like(self, pattern: impl Into<String>) -> Filter {
        Filter::Like {
            field: self.name,
            pattern: pattern.into(),
        }
    }

    pub fn is_in<V: Into<FilterValue>>(self, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::In {
            field: self.name,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(self) -> Filter {
        Filter::IsNull(self.name)
    }

    pub fn is_not_null(self) -> Filter {
        Filter::NotNull(self.name)
    }
}

impl Filter {
    /// Conjunction of all `filters`; an empty list matches every row.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::And(filters.into_iter().collect())
    }

    /// Disjunction of all `filters`; an empty list matches no row.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), right) => {
                left.push(right);
                Filter::And(left)
            }
            (left, Filter::And(right)) => {
                let mut terms = Vec::with_capacity(right.len() + 1);
                terms.push(left);
                terms.extend(right);
                Filter::And(terms)
            }
            (left, right) => Filter::And(vec![left, right]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Or(mut left), Filter::Or(right)) => {
                left.extend(right);
                Filter::Or(left)
            }
            (Filter::Or(mut left), right) => {
                left.push(right);
                Filter::Or(left)
            }
            (left, Filter::Or(right)) => {
                let mut terms = Vec::with_capacity(right.len() + 1);
                terms.push(left);
                terms.extend(right);
                Filter::Or(terms)
            }
            (left, right) => Filter::Or(vec![left, right]),
        }
    }

    /// Logical negation; negating a negation unwraps it.
    pub fn negate(self) -> Filter {
        match self {
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    /// Field names referenced anywhere in the predicate, in first-use order.
    pub fn fields(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_fields(&mut names);
        names
    }

    fn collect_fields<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Filter::Compare { field, .. }
            | Filter::Like { field, .. }
            | Filter::In { field, .. }
            | Filter::IsNull(field)
            | Filter::NotNull(field) => {
                if !names.contains(&field.as_str()) {
                    names.push(field.as_str());
                }
            }
            Filter::And(terms) | Filter::Or(terms) => {
                for term in terms {
                    term.collect_fields(names);
                }
            }
            Filter::Not(inner) => inner.collect_fields(names),
        }
    }

    /// Renders the predicate as a SQL boolean expression, appending bound
    /// values to `params` in placeholder order.
    pub(crate) fn render(
        &self,
        descriptor: &EntityDescriptor,
        params: &mut Vec<SqlValue>,
    ) -> RepoResult<String> {
        match self {
            Filter::Compare { field, op, value } => {
                let column = descriptor.require_column(field)?;
                if *value == FilterValue::Null {
                    return match op {
                        CompareOp::Eq => Ok(format!("\"{}\" IS NULL", column.name)),
                        CompareOp::Ne => Ok(format!("\"{}\" IS NOT NULL", column.name)),
                        _ => Err(RepoError::validation(format!(
                            "`{field}` cannot be compared with null using `{}`",
                            op.sql()
                        ))),
                    };
                }
                params.push(json_to_sql(descriptor.table, column, &value.to_json())?);
                Ok(format!("\"{}\" {} ?", column.name, op.sql()))
            }
            Filter::Like { field, pattern } => {
                let column = descriptor.require_column(field)?;
                params.push(SqlValue::Text(pattern.clone()));
                Ok(format!("\"{}\" LIKE ?", column.name))
            }
            Filter::In { field, values } => {
                let column = descriptor.require_column(field)?;
                if values.is_empty() {
                    return Ok("0 = 1".to_string());
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    params.push(json_to_sql(descriptor.table, column, &value.to_json())?);
                    placeholders.push("?");
                }
                Ok(format!("\"{}\" IN ({})", column.name, placeholders.join(", ")))
            }
            Filter::IsNull(field) => {
                let column = descriptor.require_column(field)?;
                Ok(format!("\"{}\" IS NULL", column.name))
            }
            Filter::NotNull(field) => {
                let column = descriptor.require_column(field)?;
                Ok(format!("\"{}\" IS NOT NULL", column.name))
            }
            Filter::And(terms) => render_group(terms, "AND", "1 = 1", descriptor, params),
            Filter::Or(terms) => render_group(terms, "OR", "0 = 1", descriptor, params),
            Filter::Not(inner) => Ok(format!("NOT ({})", inner.render(descriptor, params)?)),
        }
    }
}

fn render_group(
    terms: &[Filter],
    joiner: &str,
    empty: &str,
    descriptor: &EntityDescriptor,
    params: &mut Vec<SqlValue>,
) -> RepoResult<String> {
    match terms {
        [] => Ok(empty.to_string()),
        [single] => single.render(descriptor, params),
        many => {
            let rendered = many
                .iter()
                .map(|term| term.render(descriptor, params))
                .collect::<RepoResult<Vec<_>>>()?;
            Ok(format!("({})", rendered.join(&format!(" {joiner} "))))
        }
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        self.negate()
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::Compare { field, op, value } => write!(f, "{field} {} {value}", op.sql()),
            Filter::Like { field, pattern } => write!(f, "{field} LIKE {pattern:?}"),
            Filter::In { field, values } => {
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{field} IN ({})", rendered.join(", "))
            }
            Filter::IsNull(field) => write!(f, "{field} IS NULL"),
            Filter::NotNull(field) => write!(f, "{field} IS NOT NULL"),
            Filter::And(terms) => write_group(f, terms, "AND", "TRUE"),
            Filter::Or(terms) => write_group(f, terms, "OR", "FALSE"),
            Filter::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

fn write_group(
    f: &mut Formatter<'_>,
    terms: &[Filter],
    joiner: &str,
    empty: &str,
) -> std::fmt::Result {
    if terms.is_empty() {
        return write!(f, "{empty}");
    }
    write!(f, "(")?;
    for (index, term) in terms.iter().enumerate() {
        if index > 0 {
            write!(f, " {joiner} ")?;
        }
        write!(f, "{term}")?;
    }
    write!(f, ")")
}
