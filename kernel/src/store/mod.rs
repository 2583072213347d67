// Table Store Abstraction
//
// Defines the contract the table-maintenance core needs from a
// versioned, transactional table store, plus two implementations:
// an in-process store and a directory-backed store.

use chrono::Utc;

use crate::log::{Commit, CommitInfo, Operation};
use crate::replay::ReplayError;
use crate::table::{Field, Row, Schema, SchemaError, Snapshot, TableHead, TableName, Version};

mod fs;
mod memory;

pub use self::fs::FileStore;
pub use self::memory::MemoryStore;

/// Errors surfaced by a table store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write conflict on `{table}`: commit based on version {expected}, latest is {actual}")]
    WriteConflict {
        table: TableName,
        expected: Version,
        actual: Version,
    },

    #[error("table `{0}` not found")]
    TableNotFound(TableName),

    #[error("table `{0}` already exists")]
    TableAlreadyExists(TableName),

    #[error("table `{table}` has no version {version}")]
    VersionNotFound { table: TableName, version: Version },

    #[error("invalid schema change: {0}")]
    Schema(#[from] SchemaError),

    #[error("table invariant failed: {0}")]
    Invariant(#[from] ReplayError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for optimistic-concurrency failures, which callers may retry.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }
}

/// Storage backend for versioned tables.
///
/// Properties required from implementations:
/// - Every commit is atomic and gets the next version number
/// - Commits are compare-and-swap on the caller's base version
/// - Committed versions are immutable and readable by version
///
/// Implementations MUST NOT:
/// - Expose partially applied commits to readers
/// - Drop or retype existing columns
/// - Accept a commit whose base version is not the latest
pub trait TableStore: Send + Sync {
    /// Create a table at version 0 with no rows.
    fn create_table(&self, name: &TableName, schema: Schema) -> Result<Snapshot, StoreError>;

    /// Remove a table and its whole history.
    fn drop_table(&self, name: &TableName) -> Result<(), StoreError>;

    fn table_exists(&self, name: &TableName) -> Result<bool, StoreError>;

    /// Latest version and declared schema, without reading rows.
    fn table_head(&self, name: &TableName) -> Result<TableHead, StoreError>;

    /// Full snapshot at the latest version.
    fn read_snapshot(&self, name: &TableName) -> Result<Snapshot, StoreError>;

    /// Full snapshot as of `version`.
    fn read_snapshot_at(&self, name: &TableName, version: Version) -> Result<Snapshot, StoreError>;

    /// Add `rows` on top of `base`.
    ///
    /// Rows are aligned with the declared schema followed by
    /// `schema_delta`, whose columns must be new and nullable.
    fn commit_append(
        &self,
        name: &TableName,
        base: Version,
        rows: Vec<Row>,
        schema_delta: &[Field],
    ) -> Result<Version, StoreError>;

    /// Replace the whole row set of `base` with `rows`.
    fn commit_overwrite(
        &self,
        name: &TableName,
        base: Version,
        rows: Vec<Row>,
        schema_delta: &[Field],
    ) -> Result<Version, StoreError>;

    /// Commit summaries, oldest first.
    fn history(&self, name: &TableName) -> Result<Vec<CommitInfo>, StoreError>;

    fn latest_version(&self, name: &TableName) -> Result<Version, StoreError> {
        Ok(self.table_head(name)?.version)
    }

    fn declared_schema(&self, name: &TableName) -> Result<Schema, StoreError> {
        Ok(self.table_head(name)?.schema)
    }
}

/// Build the commit for a mutation based on `base`, checking it is
/// still the latest version.
pub(crate) fn prepare_commit(
    name: &TableName,
    latest: &TableHead,
    base: Version,
    operation: Operation,
    rows: Vec<Row>,
    schema_delta: &[Field],
) -> Result<Commit, StoreError> {
    if base != latest.version {
        return Err(StoreError::WriteConflict {
            table: name.clone(),
            expected: base,
            actual: latest.version,
        });
    }

    Ok(Commit {
        version: base + 1,
        timestamp: Utc::now(),
        operation,
        schema: latest.schema.with_added_fields(schema_delta)?,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnType, TableId};

    fn head(version: Version) -> TableHead {
        TableHead {
            table_id: TableId::new(),
            version,
            schema: Schema::new(vec![Field::nullable("model", ColumnType::String)]).unwrap(),
        }
    }

    #[test]
    fn stale_base_is_a_write_conflict() {
        let name = TableName::new("drives").unwrap();
        let err = prepare_commit(&name, &head(4), 3, Operation::Append, vec![], &[]).unwrap_err();
        assert!(err.is_write_conflict());
        assert!(err.to_string().contains("version 3, latest is 4"));
    }

    #[test]
    fn commit_schema_includes_delta() {
        let name = TableName::new("drives").unwrap();
        let commit = prepare_commit(
            &name,
            &head(4),
            4,
            Operation::Append,
            vec![],
            &[Field::nullable("ahab", ColumnType::String)],
        )
        .unwrap();
        assert_eq!(commit.version, 5);
        assert_eq!(commit.schema.index_of("ahab"), Some(1));
    }
}
