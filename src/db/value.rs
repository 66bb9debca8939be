//! Database-agnostic values and rows.
//!
//! Statements bind `Value`s positionally and backends hand rows back as `Row`s,
//! so the session layer never depends on a concrete driver's row type.

use crate::error::DbError;
use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL of no particular type; binds as a TEXT null.
    Null,
    /// NULL bound with the column's storage type. PostgreSQL rejects a TEXT
    /// null in an integer column.
    TypedNull(ColumnType),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Storage type of a selected column; drives decoding in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    Text,
    /// Stored as INTEGER 0/1 for portability between PostgreSQL and SQLite.
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Int,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Text,
        }
    }

    pub const fn bool(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Bool,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::TypedNull(_))
    }

    /// Attach `ty` to an untyped NULL; other values pass through.
    pub fn typed_as(self, ty: ColumnType) -> Self {
        match self {
            Value::Null => Value::TypedNull(ty),
            other => other,
        }
    }
}

/// Timestamps are persisted as RFC3339 text with a `Z` suffix so that
/// lexical order matches chronological order.
pub fn timestamp_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Text(timestamp_text(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row: column names paired with decoded values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, v)| v)
    }

    pub fn get(&self, name: &str) -> Result<&Value, DbError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| decode_err(name, "column missing from row"))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, DbError> {
        self.get_opt_i64(name)?
            .ok_or_else(|| decode_err(name, "unexpected NULL"))
    }

    pub fn get_opt_i64(&self, name: &str) -> Result<Option<i64>, DbError> {
        match self.get(name)? {
            Value::Null | Value::TypedNull(_) => Ok(None),
            Value::Int(v) => Ok(Some(*v)),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            other => Err(decode_err(name, &format!("expected integer, got {other:?}"))),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, DbError> {
        match self.get(name)? {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(*v != 0),
            other => Err(decode_err(name, &format!("expected boolean, got {other:?}"))),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str, DbError> {
        self.get_opt_str(name)?
            .ok_or_else(|| decode_err(name, "unexpected NULL"))
    }

    pub fn get_opt_str(&self, name: &str) -> Result<Option<&str>, DbError> {
        match self.get(name)? {
            Value::Null | Value::TypedNull(_) => Ok(None),
            Value::Text(s) => Ok(Some(s.as_str())),
            other => Err(decode_err(name, &format!("expected text, got {other:?}"))),
        }
    }

    pub fn get_opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>, DbError> {
        self.get_opt_str(name)?
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| decode_err(name, &e.to_string()))
            })
            .transpose()
    }

    pub fn get_datetime(&self, name: &str) -> Result<DateTime<Utc>, DbError> {
        self.get_opt_datetime(name)?
            .ok_or_else(|| decode_err(name, "unexpected NULL"))
    }
}

fn decode_err(column: &str, reason: &str) -> DbError {
    DbError::Decode {
        column: column.to_string(),
        reason: reason.to_string(),
    }
}
