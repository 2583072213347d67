// Rows and Append Batches

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::schema::{Schema, SchemaError};
use super::value::Value;

/// One record, positionally aligned with a schema.
///
/// Rows compare lexicographically over their values, which gives a
/// total order over full rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extend with nulls up to `width` columns.
    pub fn pad_to(&mut self, width: usize) {
        if self.0.len() < width {
            self.0.resize(width, Value::Null);
        }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Check that every row matches `schema` in width and value types.
pub fn check_rows(schema: &Schema, rows: &[Row]) -> Result<(), SchemaError> {
    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != schema.len() {
            return Err(SchemaError::RowWidth {
                row: row_idx,
                expected: schema.len(),
                actual: row.len(),
            });
        }
        for (field, value) in schema.fields().iter().zip(row.values()) {
            if let Some(actual) = value.column_type() {
                if actual != field.data_type {
                    return Err(SchemaError::ValueType {
                        row: row_idx,
                        column: field.name.clone(),
                        expected: field.data_type,
                        actual,
                    });
                }
            }
        }
    }
    Ok(())
}

/// A batch of rows proposed for a table, with its own column set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    schema: Schema,
    rows: Vec<Row>,
}

impl Batch {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Result<Self, SchemaError> {
        check_rows(&schema, &rows)?;
        Ok(Self { schema, rows })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Columns actually present in the batch.
    pub fn columns(&self) -> BTreeSet<String> {
        self.schema.column_names()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_parts(self) -> (Schema, Vec<Row>) {
        (self.schema, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnType, Field};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::nullable("serial_number", ColumnType::String),
            Field::nullable("capacity_bytes", ColumnType::Int64),
        ])
        .unwrap()
    }

    #[test]
    fn batch_rejects_ragged_rows() {
        let err = Batch::new(schema(), vec![Row::new(vec![Value::from("x")])]).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::RowWidth {
                row: 0,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn batch_rejects_mistyped_values() {
        let err = Batch::new(
            schema(),
            vec![Row::new(vec![Value::from("x"), Value::from("big")])],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ValueType { ref column, .. } if column == "capacity_bytes"));
    }

    #[test]
    fn batch_accepts_nulls_anywhere() {
        let batch = Batch::new(schema(), vec![Row::new(vec![Value::Null, Value::Null])]).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.columns().contains("capacity_bytes"));
    }

    #[test]
    fn pad_fills_with_null() {
        let mut row = Row::new(vec![Value::Int64(1)]);
        row.pad_to(3);
        assert_eq!(row.values(), &[Value::Int64(1), Value::Null, Value::Null]);
    }
}
