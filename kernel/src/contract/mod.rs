// Append Validation
//
// Checks a candidate batch's column set against a caller-supplied
// required/optional contract and the table's declared columns before
// anything is written. Validation is read-only and can be repeated
// freely as a dry run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TableError;
use crate::store::TableStore;
use crate::table::{column_list, Batch, TableName};

/// Per-call assertion about which columns a batch must and may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnContract {
    pub required: BTreeSet<String>,
    pub optional: BTreeSet<String>,
}

impl ColumnContract {
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }
}

/// Reason a batch was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("batch is missing required columns: {}", column_list(.0))]
    MissingRequiredColumns(BTreeSet<String>),

    #[error("batch has unrecognized columns: {}", column_list(.0))]
    UnrecognizedColumns(BTreeSet<String>),
}

/// Validate a batch's columns against the table's columns and a contract.
///
/// Missing required columns are reported before unrecognized ones.
pub fn validate_columns(
    table_columns: &BTreeSet<String>,
    batch_columns: &BTreeSet<String>,
    contract: &ColumnContract,
) -> Result<(), ValidationError> {
    let missing: BTreeSet<String> = contract
        .required
        .difference(batch_columns)
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingRequiredColumns(missing));
    }

    let extra: BTreeSet<String> = batch_columns
        .iter()
        .filter(|c| {
            !table_columns.contains(*c)
                && !contract.optional.contains(*c)
                && !contract.required.contains(*c)
        })
        .cloned()
        .collect();
    if !extra.is_empty() {
        return Err(ValidationError::UnrecognizedColumns(extra));
    }

    Ok(())
}

/// Validate `batch` against the current declared schema of `table`.
pub fn validate<S: TableStore + ?Sized>(
    store: &S,
    table: &TableName,
    batch: &Batch,
    contract: &ColumnContract,
) -> Result<(), TableError> {
    let declared = store.declared_schema(table)?;
    let result = validate_columns(&declared.column_names(), &batch.columns(), contract);

    debug!(
        table = %table,
        batch_columns = batch.schema().len(),
        accepted = result.is_ok(),
        "append validated"
    );
    Ok(result?)
}
