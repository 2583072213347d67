// Append Writer
//
// Aligns a normalized batch with the table's declared schema and
// commits it as a pure append. Existing rows are never touched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ColumnMismatch, TableError};
use crate::store::TableStore;
use crate::table::{Batch, Field, Row, Schema, TableName, Value, Version};

/// How to treat batch columns the table does not declare yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Reject them with `UnknownColumns`.
    #[default]
    Strict,

    /// Add them to the table as nullable columns in the same commit.
    Merge,
}

/// Rows aligned to the post-commit schema, plus the columns to add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendPlan {
    pub rows: Vec<Row>,
    pub schema_delta: Vec<Field>,
}

/// Compute the rows and schema delta for appending `batch` to a
/// table declared as `declared`.
pub fn plan_append(
    declared: &Schema,
    batch: &Batch,
    mode: SchemaMode,
) -> Result<AppendPlan, TableError> {
    let incoming = batch.schema();

    let mismatches: Vec<ColumnMismatch> = incoming
        .fields()
        .iter()
        .filter_map(|field| {
            declared
                .field(&field.name)
                .filter(|existing| existing.data_type != field.data_type)
                .map(|existing| ColumnMismatch {
                    column: field.name.clone(),
                    declared: existing.data_type,
                    actual: field.data_type,
                })
        })
        .collect();
    if !mismatches.is_empty() {
        return Err(TableError::SchemaMismatch(mismatches));
    }

    let schema_delta: Vec<Field> = incoming
        .fields()
        .iter()
        .filter(|field| !declared.contains(&field.name))
        .map(|field| Field::nullable(field.name.clone(), field.data_type))
        .collect();
    if mode == SchemaMode::Strict && !schema_delta.is_empty() {
        return Err(TableError::UnknownColumns(
            schema_delta.iter().map(|f| f.name.clone()).collect(),
        ));
    }

    let target = declared.with_added_fields(&schema_delta)?;
    let sources: Vec<Option<usize>> = target
        .fields()
        .iter()
        .map(|field| incoming.index_of(&field.name))
        .collect();

    let violations: BTreeSet<String> = target
        .fields()
        .iter()
        .zip(&sources)
        .filter(|(field, source)| {
            !field.nullable
                && match source {
                    None => true,
                    Some(idx) => batch.rows().iter().any(|row| row.0[*idx].is_null()),
                }
        })
        .map(|(field, _)| field.name.clone())
        .collect();
    if !violations.is_empty() {
        return Err(TableError::NullViolation(violations));
    }

    let rows = batch
        .rows()
        .iter()
        .map(|row| {
            Row::new(
                sources
                    .iter()
                    .map(|source| source.map_or(Value::Null, |idx| row.0[idx].clone()))
                    .collect(),
            )
        })
        .collect();

    Ok(AppendPlan { rows, schema_delta })
}

/// Append `batch` to `table` in a single attempt.
///
/// Returns the new version, or the current one when the batch is
/// empty. A concurrent commit surfaces as a write conflict; callers
/// retry the whole call (see `retry::RetryPolicy`).
pub fn append<S: TableStore + ?Sized>(
    store: &S,
    table: &TableName,
    batch: &Batch,
    mode: SchemaMode,
) -> Result<Version, TableError> {
    let head = store.table_head(table)?;
    let AppendPlan { rows, schema_delta } = plan_append(&head.schema, batch, mode)?;

    if rows.is_empty() {
        debug!(table = %table, version = head.version, "empty batch, nothing to append");
        return Ok(head.version);
    }

    let row_count = rows.len();
    let version = store.commit_append(table, head.version, rows, &schema_delta)?;

    let added: Vec<&str> = schema_delta.iter().map(|f| f.name.as_str()).collect();
    info!(
        table = %table,
        version,
        rows = row_count,
        added_columns = ?added,
        "batch appended"
    );
    Ok(version)
}
