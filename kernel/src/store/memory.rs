// In-Process Table Store
//
// Keeps each table's commit log and latest snapshot behind a mutex.
// Suitable for tests and single-process pipelines.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use super::{prepare_commit, StoreError, TableStore};
use crate::invariants::InvariantEngine;
use crate::log::{Commit, CommitInfo, CommitLog, LogError, Operation};
use crate::replay::{advance, apply_commit, replay_snapshot, ReplayError};
use crate::table::{Field, Row, Schema, Snapshot, TableHead, TableId, TableName, Version};

struct MemoryTable {
    log: CommitLog,
    // Always `Some` once the table exists; taken while a commit is applied.
    current: Option<Snapshot>,
}

impl MemoryTable {
    fn current(&self, name: &TableName) -> Result<&Snapshot, StoreError> {
        self.current
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable(format!("table `{name}` is mid-commit")))
    }
}

/// Thread-safe in-memory store.
pub struct MemoryStore {
    tables: Mutex<HashMap<TableName, MemoryTable>>,
    invariants: InvariantEngine,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            invariants: InvariantEngine::standard(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TableName, MemoryTable>>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn commit(
        &self,
        name: &TableName,
        base: Version,
        operation: Operation,
        rows: Vec<Row>,
        schema_delta: &[Field],
    ) -> Result<Version, StoreError> {
        let mut tables = self.lock()?;
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))?;

        let head = table.current(name)?.head();
        let commit = prepare_commit(name, &head, base, operation, rows, schema_delta)?;
        self.invariants
            .evaluate(Some(&head), &commit)
            .map_err(ReplayError::from)?;

        let version = commit.version;
        append_to_log(name, &mut table.log, &commit)?;
        let previous = table.current.take();
        table.current = Some(advance(name, previous, &commit)?);

        debug!(table = %name, version, rows = commit.rows.len(), "memory commit applied");
        Ok(version)
    }
}

fn append_to_log(name: &TableName, log: &mut CommitLog, commit: &Commit) -> Result<(), StoreError> {
    log.append(commit.clone()).map_err(|err| match err {
        LogError::VersionConflict { expected, actual } => StoreError::WriteConflict {
            table: name.clone(),
            expected: actual.saturating_sub(1),
            actual: expected.saturating_sub(1),
        },
    })
}

impl TableStore for MemoryStore {
    fn create_table(&self, name: &TableName, schema: Schema) -> Result<Snapshot, StoreError> {
        let mut tables = self.lock()?;
        if tables.contains_key(name) {
            return Err(StoreError::TableAlreadyExists(name.clone()));
        }

        let commit = Commit {
            version: 0,
            timestamp: Utc::now(),
            operation: Operation::Create {
                table_id: TableId::new(),
            },
            schema,
            rows: vec![],
        };
        let snapshot = apply_commit(name, None, &commit, &self.invariants)?;

        let mut log = CommitLog::new();
        append_to_log(name, &mut log, &commit)?;
        tables.insert(
            name.clone(),
            MemoryTable {
                log,
                current: Some(snapshot.clone()),
            },
        );

        debug!(table = %name, "memory table created");
        Ok(snapshot)
    }

    fn drop_table(&self, name: &TableName) -> Result<(), StoreError> {
        self.lock()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))
    }

    fn table_exists(&self, name: &TableName) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(name))
    }

    fn table_head(&self, name: &TableName) -> Result<TableHead, StoreError> {
        let tables = self.lock()?;
        let table = tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))?;
        Ok(table.current(name)?.head())
    }

    fn read_snapshot(&self, name: &TableName) -> Result<Snapshot, StoreError> {
        let tables = self.lock()?;
        let table = tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))?;
        Ok(table.current(name)?.clone())
    }

    fn read_snapshot_at(&self, name: &TableName, version: Version) -> Result<Snapshot, StoreError> {
        let tables = self.lock()?;
        let table = tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))?;

        match table.log.current_version() {
            Some(latest) if version <= latest => Ok(replay_snapshot(
                name,
                table.log.commits_through(version),
                &self.invariants,
            )?),
            _ => Err(StoreError::VersionNotFound {
                table: name.clone(),
                version,
            }),
        }
    }

    fn commit_append(
        &self,
        name: &TableName,
        base: Version,
        rows: Vec<Row>,
        schema_delta: &[Field],
    ) -> Result<Version, StoreError> {
        self.commit(name, base, Operation::Append, rows, schema_delta)
    }

    fn commit_overwrite(
        &self,
        name: &TableName,
        base: Version,
        rows: Vec<Row>,
        schema_delta: &[Field],
    ) -> Result<Version, StoreError> {
        self.commit(name, base, Operation::Overwrite, rows, schema_delta)
    }

    fn history(&self, name: &TableName) -> Result<Vec<CommitInfo>, StoreError> {
        let tables = self.lock()?;
        let table = tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))?;
        Ok(table.log.commits().iter().map(Commit::info).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::OperationKind;
    use crate::table::{ColumnType, Value};

    fn name() -> TableName {
        TableName::new("drives").unwrap()
    }

    fn schema() -> Schema {
        Schema::new(vec![Field::nullable("serial_number", ColumnType::String)]).unwrap()
    }

    fn row(serial: &str) -> Row {
        Row::new(vec![Value::from(serial)])
    }

    #[test]
    fn create_append_and_read() {
        let store = MemoryStore::new();
        let created = store.create_table(&name(), schema()).unwrap();
        assert_eq!(created.version, 0);

        let v1 = store.commit_append(&name(), 0, vec![row("a")], &[]).unwrap();
        let v2 = store.commit_append(&name(), v1, vec![row("b")], &[]).unwrap();
        assert_eq!((v1, v2), (1, 2));

        let snapshot = store.read_snapshot(&name()).unwrap();
        assert_eq!(snapshot.rows, vec![row("a"), row("b")]);
        assert_eq!(snapshot.table_id, created.table_id);
    }

    #[test]
    fn stale_base_conflicts_and_leaves_table_unchanged() {
        let store = MemoryStore::new();
        store.create_table(&name(), schema()).unwrap();
        store.commit_append(&name(), 0, vec![row("a")], &[]).unwrap();

        let err = store
            .commit_overwrite(&name(), 0, vec![], &[])
            .unwrap_err();
        assert!(err.is_write_conflict());
        assert_eq!(store.read_snapshot(&name()).unwrap().rows, vec![row("a")]);
    }

    #[test]
    fn time_travel_reads_old_versions() {
        let store = MemoryStore::new();
        store.create_table(&name(), schema()).unwrap();
        store.commit_append(&name(), 0, vec![row("a")], &[]).unwrap();
        store.commit_overwrite(&name(), 1, vec![], &[]).unwrap();

        assert_eq!(store.read_snapshot_at(&name(), 1).unwrap().rows, vec![row("a")]);
        assert!(store.read_snapshot_at(&name(), 2).unwrap().is_empty());
        assert!(matches!(
            store.read_snapshot_at(&name(), 3),
            Err(StoreError::VersionNotFound { version: 3, .. })
        ));
    }

    #[test]
    fn invalid_rows_are_rejected_before_commit() {
        let store = MemoryStore::new();
        store.create_table(&name(), schema()).unwrap();

        let err = store
            .commit_append(&name(), 0, vec![Row::new(vec![Value::Int64(1)])], &[])
            .unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)));
        assert_eq!(store.latest_version(&name()).unwrap(), 0);
    }

    #[test]
    fn history_lists_operations() {
        let store = MemoryStore::new();
        store.create_table(&name(), schema()).unwrap();
        store.commit_append(&name(), 0, vec![row("a"), row("a")], &[]).unwrap();
        store.commit_overwrite(&name(), 1, vec![row("a")], &[]).unwrap();

        let kinds: Vec<_> = store
            .history(&name())
            .unwrap()
            .into_iter()
            .map(|info| (info.operation, info.rows))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (OperationKind::Create, 0),
                (OperationKind::Append, 2),
                (OperationKind::Overwrite, 1)
            ]
        );
    }

    #[test]
    fn duplicate_create_and_missing_tables() {
        let store = MemoryStore::new();
        store.create_table(&name(), schema()).unwrap();
        assert!(matches!(
            store.create_table(&name(), schema()),
            Err(StoreError::TableAlreadyExists(_))
        ));

        store.drop_table(&name()).unwrap();
        assert!(!store.table_exists(&name()).unwrap());
        assert!(matches!(
            store.read_snapshot(&name()),
            Err(StoreError::TableNotFound(_))
        ));
    }
}
