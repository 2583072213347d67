// Core Operation Errors

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::contract::ValidationError;
use crate::store::StoreError;
use crate::table::{column_list, ColumnType, SchemaError};

/// A batch column whose type disagrees with the table's declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMismatch {
    pub column: String,
    pub declared: ColumnType,
    pub actual: ColumnType,
}

impl fmt::Display for ColumnMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` is {} in the table but {} in the batch",
            self.column, self.declared, self.actual
        )
    }
}

fn mismatch_list(mismatches: &[ColumnMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by the append, validation and deduplication paths.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("schema mismatch: {}", mismatch_list(.0))]
    SchemaMismatch(Vec<ColumnMismatch>),

    #[error("batch has columns the table does not declare: {}", column_list(.0))]
    UnknownColumns(BTreeSet<String>),

    #[error("null values for non-nullable columns: {}", column_list(.0))]
    NullViolation(BTreeSet<String>),

    #[error("key columns not present in the table: {}", column_list(.0))]
    UnknownKeyColumns(BTreeSet<String>),

    #[error("at least one key column is required")]
    EmptyKey,

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: StoreError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TableError {
    /// True when a fresh read-compute-commit cycle may succeed.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, TableError::Store(err) if err.is_write_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableName;

    #[test]
    fn schema_mismatch_names_every_column() {
        let err = TableError::SchemaMismatch(vec![
            ColumnMismatch {
                column: "capacity_bytes".into(),
                declared: ColumnType::Int64,
                actual: ColumnType::String,
            },
            ColumnMismatch {
                column: "failure".into(),
                declared: ColumnType::Boolean,
                actual: ColumnType::Int64,
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("`capacity_bytes` is BIGINT in the table but STRING"));
        assert!(msg.contains("`failure` is BOOLEAN"));
    }

    #[test]
    fn write_conflict_detection() {
        let conflict = TableError::Store(StoreError::WriteConflict {
            table: TableName::new("t").unwrap(),
            expected: 1,
            actual: 2,
        });
        assert!(conflict.is_write_conflict());
        assert!(!TableError::EmptyKey.is_write_conflict());
    }
}
