// Typed Values
//
// Column types and the cell values carried by rows. Values have a
// total order (`Null` sorts first) so row selection is reproducible.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Date,
    String,
    Int64,
    Boolean,
}

impl ColumnType {
    /// SQL spelling used in DDL and error messages.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Date => "DATE",
            ColumnType::String => "STRING",
            ColumnType::Int64 => "BIGINT",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Int64(i64),
    String(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of a non-null value.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Int64(_) => Some(ColumnType::Int64),
            Value::String(_) => Some(ColumnType::String),
            Value::Date(_) => Some(ColumnType::Date),
        }
    }

    /// True when the value may be stored in a column of `ty`.
    pub fn fits(&self, ty: ColumnType) -> bool {
        self.column_type().map_or(true, |actual| actual == ty)
    }

    /// Render as JSON for display purposes.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(v) => serde_json::Value::Bool(*v),
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::String(v) => serde_json::Value::String(v.clone()),
            Value::Date(v) => serde_json::Value::String(v.format("%Y-%m-%d").to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "'{v}'"),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_before_everything() {
        let date = NaiveDate::from_ymd_opt(2022, 7, 1).unwrap();
        let mut values = vec![
            Value::Date(date),
            Value::from("a"),
            Value::Int64(-4),
            Value::Boolean(true),
            Value::Null,
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[4], Value::Date(date));
    }

    #[test]
    fn null_fits_any_type() {
        assert!(Value::Null.fits(ColumnType::Date));
        assert!(Value::Int64(1).fits(ColumnType::Int64));
        assert!(!Value::Int64(1).fits(ColumnType::String));
    }

    #[test]
    fn date_renders_iso() {
        let date = NaiveDate::from_ymd_opt(2022, 7, 1).unwrap();
        assert_eq!(Value::Date(date).to_string(), "2022-07-01");
        assert_eq!(Value::Date(date).to_json(), serde_json::json!("2022-07-01"));
    }
}
