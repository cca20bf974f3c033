//! Value types for rivven-provision
//!
//! Catalog reads only ever see a handful of PostgreSQL types (`name`, `text`,
//! `bool`, `int4`, `oid`), so the value model is deliberately small.

use crate::error::{Error, Result};

/// SQL value passed as a statement parameter or read from a catalog row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// Text string (TEXT, NAME, VARCHAR)
    String(String),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "on" => Some(true),
                "false" | "f" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Database row as ordered column values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Create a row with positional column names (`?column?` style)
    pub fn from_values(values: Vec<Value>) -> Self {
        let columns = (0..values.len()).map(|i| format!("column{}", i)).collect();
        Self { columns, values }
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Read a text column, failing if it is missing or not text
    pub fn string(&self, idx: usize) -> Result<String> {
        self.get(idx)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| self.type_error(idx, "text"))
    }

    /// Read a boolean column
    pub fn boolean(&self, idx: usize) -> Result<bool> {
        self.get(idx)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.type_error(idx, "boolean"))
    }

    /// Read an integer column
    pub fn int(&self, idx: usize) -> Result<i64> {
        self.get(idx)
            .and_then(Value::as_i64)
            .ok_or_else(|| self.type_error(idx, "integer"))
    }

    fn type_error(&self, idx: usize, expected: &str) -> Error {
        let column = self.columns.get(idx).map(String::as_str).unwrap_or("?");
        Error::internal(format!(
            "expected {} in column {} ({}), got {:?}",
            expected,
            idx,
            column,
            self.values.get(idx)
        ))
    }
}
