//! Conversion between JSON record values and SQLite column values.
//!
//! # Invariants
//! - Timestamps are written as fixed-width UTC text
//!   (`YYYY-MM-DDTHH:MM:SS.ffffffZ`), so ordering and range filters on
//!   timestamp columns compare chronologically.
//! - Read paths reject values that do not fit the declared column kind
//!   instead of masking them.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Column, ColumnKind};
use chrono::{DateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value as JsonValue};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Formats a timestamp the way the session stores it.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn timestamp_json(at: &DateTime<Utc>) -> JsonValue {
    JsonValue::String(format_timestamp(at))
}

pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

/// Converts one record value into the SQLite value for `column`.
pub(crate) fn json_to_sql(table: &str, column: Column, value: &JsonValue) -> RepoResult<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let converted = match (column.kind, value) {
        (ColumnKind::Integer, JsonValue::Number(number)) => number.as_i64().map(SqlValue::Integer),
        (ColumnKind::Integer, JsonValue::Bool(flag)) => Some(SqlValue::Integer(bool_to_int(*flag))),
        (ColumnKind::Real, JsonValue::Number(number)) => number.as_f64().map(SqlValue::Real),
        (ColumnKind::Text | ColumnKind::Uuid, JsonValue::String(text)) => {
            Some(SqlValue::Text(text.clone()))
        }
        (ColumnKind::Bool, JsonValue::Bool(flag)) => Some(SqlValue::Integer(bool_to_int(*flag))),
        (ColumnKind::Bool, JsonValue::Number(number)) => match number.as_i64() {
            Some(flag @ (0 | 1)) => Some(SqlValue::Integer(flag)),
            _ => None,
        },
        (ColumnKind::Timestamp, JsonValue::String(text)) => {
            parse_timestamp(text).map(|at| SqlValue::Text(format_timestamp(&at)))
        }
        (ColumnKind::Json, other) => Some(SqlValue::Text(other.to_string())),
        _ => None,
    };

    converted.ok_or_else(|| {
        RepoError::mapping(format!(
            "value `{value}` does not fit {:?} column `{table}.{}`",
            column.kind, column.name
        ))
    })
}

/// Converts one SQLite value read from `column` back into a record value.
pub(crate) fn sql_to_json(table: &str, column: Column, value: ValueRef<'_>) -> RepoResult<JsonValue> {
    let invalid = |detail: &str| {
        RepoError::InvalidData(format!(
            "invalid {detail} in {table}.{} ({:?} column)",
            column.name, column.kind
        ))
    };

    match (column.kind, value) {
        (_, ValueRef::Null) => Ok(JsonValue::Null),
        (ColumnKind::Integer, ValueRef::Integer(number)) => Ok(JsonValue::from(number)),
        (ColumnKind::Real, ValueRef::Real(number)) => Number::from_f64(number)
            .map(JsonValue::Number)
            .ok_or_else(|| invalid("non-finite real")),
        (ColumnKind::Real, ValueRef::Integer(number)) => Ok(JsonValue::from(number as f64)),
        (ColumnKind::Bool, ValueRef::Integer(0)) => Ok(JsonValue::Bool(false)),
        (ColumnKind::Bool, ValueRef::Integer(1)) => Ok(JsonValue::Bool(true)),
        (ColumnKind::Bool, ValueRef::Integer(other)) => {
            Err(invalid(&format!("boolean value `{other}`")))
        }
        (ColumnKind::Text | ColumnKind::Uuid | ColumnKind::Timestamp, ValueRef::Text(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|_| invalid("utf-8 text"))?;
            Ok(JsonValue::String(text.to_string()))
        }
        (ColumnKind::Json, ValueRef::Text(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|_| invalid("utf-8 text"))?;
            serde_json::from_str(text).map_err(|_| invalid("json document"))
        }
        (_, other) => Err(invalid(&format!("{:?} value", other.data_type()))),
    }
}
