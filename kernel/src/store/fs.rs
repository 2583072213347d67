// Directory-Backed Table Store
//
// Layout, one directory per table:
//
//   <root>/<table>/_commits/00000000000000000000.json
//   <root>/<table>/_commits/00000000000000000001.json
//   ...
//
// A commit is written to a temporary file and published by hard-linking
// it to its version path. Linking fails when the version already
// exists, which makes publication a compare-and-swap across processes.
//
// Commits only read the create commit and the latest commit, without
// their rows. Snapshots replay from the newest create or overwrite.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{prepare_commit, StoreError, TableStore};
use crate::invariants::InvariantEngine;
use crate::log::{Commit, CommitInfo, Operation};
use crate::replay::{replay_snapshot, replay_tail, ReplayError};
use crate::table::{Field, Row, Schema, Snapshot, TableHead, TableId, TableName, Version};

const COMMIT_DIR: &str = "_commits";
const VERSION_DIGITS: usize = 20;

/// Commit file fields needed for the table head. Rows are skipped.
#[derive(Deserialize)]
struct CommitHeader {
    operation: Operation,
    schema: Schema,
}

/// Store persisting every table as a directory of JSON commit files.
pub struct FileStore {
    root: PathBuf,
    invariants: InvariantEngine,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            invariants: InvariantEngine::standard(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, name: &TableName) -> PathBuf {
        self.root.join(name.as_str())
    }

    fn commit_dir(&self, name: &TableName) -> PathBuf {
        self.table_dir(name).join(COMMIT_DIR)
    }

    fn commit_path(&self, name: &TableName, version: Version) -> PathBuf {
        self.commit_dir(name)
            .join(format!("{version:0width$}.json", width = VERSION_DIGITS))
    }

    /// Committed versions, ascending.
    fn versions(&self, name: &TableName) -> Result<Vec<Version>, StoreError> {
        let entries = match fs::read_dir(self.commit_dir(name)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::TableNotFound(name.clone()))
            }
            Err(err) => return Err(err.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name();
            if let Some(version) = file_name.to_str().and_then(parse_commit_file_name) {
                versions.push(version);
            }
        }
        if versions.is_empty() {
            return Err(StoreError::TableNotFound(name.clone()));
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn latest(&self, name: &TableName) -> Result<Version, StoreError> {
        self.versions(name)?
            .last()
            .copied()
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))
    }

    fn load_commit(&self, name: &TableName, version: Version) -> Result<Commit, StoreError> {
        let file = File::open(self.commit_path(name, version))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn load_header(&self, name: &TableName, version: Version) -> Result<CommitHeader, StoreError> {
        let file = File::open(self.commit_path(name, version))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn table_id(&self, name: &TableName) -> Result<TableId, StoreError> {
        match self.load_header(name, 0)?.operation {
            Operation::Create { table_id } => Ok(table_id),
            _ => Err(StoreError::Invariant(ReplayError::MissingCreate(0))),
        }
    }

    fn load_commits(&self, name: &TableName) -> Result<Vec<Commit>, StoreError> {
        self.versions(name)?
            .into_iter()
            .map(|v| self.load_commit(name, v))
            .collect()
    }

    /// Commits from the newest create or overwrite up to `version`,
    /// oldest first.
    fn load_tail(&self, name: &TableName, version: Version) -> Result<Vec<Commit>, StoreError> {
        let versions = self.versions(name)?;
        if !versions.contains(&version) {
            return Err(StoreError::VersionNotFound {
                table: name.clone(),
                version,
            });
        }

        let mut tail = Vec::new();
        for v in versions.into_iter().rev().skip_while(|v| *v > version) {
            let commit = self.load_commit(name, v)?;
            let starts_tail = !matches!(commit.operation, Operation::Append);
            tail.push(commit);
            if starts_tail {
                break;
            }
        }
        tail.reverse();
        Ok(tail)
    }

    fn publish(&self, name: &TableName, commit: &Commit) -> Result<(), StoreError> {
        let dir = self.commit_dir(name);
        let tmp = dir.join(format!(".tmp-{}.json", Uuid::new_v4()));
        let target = self.commit_path(name, commit.version);

        let written = write_commit_file(&tmp, commit);
        let linked = written.and_then(|()| fs::hard_link(&tmp, &target).map_err(StoreError::from));

        if let Err(err) = fs::remove_file(&tmp) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %err, "failed to remove temporary commit file");
            }
        }

        match linked {
            Ok(()) => {
                debug!(table = %name, version = commit.version, "commit published");
                Ok(())
            }
            Err(StoreError::Io(err)) if err.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::WriteConflict {
                    table: name.clone(),
                    expected: commit.version.saturating_sub(1),
                    actual: self.latest(name)?,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn commit(
        &self,
        name: &TableName,
        base: Version,
        operation: Operation,
        rows: Vec<Row>,
        schema_delta: &[Field],
    ) -> Result<Version, StoreError> {
        let head = self.table_head(name)?;
        let commit = prepare_commit(name, &head, base, operation, rows, schema_delta)?;
        self.invariants
            .evaluate(Some(&head), &commit)
            .map_err(ReplayError::from)?;

        self.publish(name, &commit)?;
        Ok(commit.version)
    }
}

fn write_commit_file(path: &Path, commit: &Commit) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, commit)?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|err| StoreError::Io(err.into_error()))?
        .sync_all()?;
    Ok(())
}

fn parse_commit_file_name(file_name: &str) -> Option<Version> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.len() != VERSION_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

impl TableStore for FileStore {
    fn create_table(&self, name: &TableName, schema: Schema) -> Result<Snapshot, StoreError> {
        fs::create_dir_all(self.commit_dir(name))?;

        let commit = Commit {
            version: 0,
            timestamp: Utc::now(),
            operation: Operation::Create {
                table_id: TableId::new(),
            },
            schema,
            rows: vec![],
        };
        let snapshot = replay_snapshot(name, std::slice::from_ref(&commit), &self.invariants)?;

        match self.publish(name, &commit) {
            Ok(()) => Ok(snapshot),
            Err(StoreError::WriteConflict { .. }) => Err(StoreError::TableAlreadyExists(name.clone())),
            Err(err) => Err(err),
        }
    }

    fn drop_table(&self, name: &TableName) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.table_dir(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::TableNotFound(name.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn table_exists(&self, name: &TableName) -> Result<bool, StoreError> {
        match self.versions(name) {
            Ok(_) => Ok(true),
            Err(StoreError::TableNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn table_head(&self, name: &TableName) -> Result<TableHead, StoreError> {
        let latest = self.latest(name)?;
        // Every commit records the full schema as of that version.
        let schema = self.load_header(name, latest)?.schema;
        Ok(TableHead {
            table_id: self.table_id(name)?,
            version: latest,
            schema,
        })
    }

    fn read_snapshot(&self, name: &TableName) -> Result<Snapshot, StoreError> {
        let latest = self.latest(name)?;
        self.read_snapshot_at(name, latest)
    }

    fn read_snapshot_at(&self, name: &TableName, version: Version) -> Result<Snapshot, StoreError> {
        let tail = self.load_tail(name, version)?;
        let table_id = match tail.first().map(|c| &c.operation) {
            Some(Operation::Create { table_id }) => *table_id,
            _ => self.table_id(name)?,
        };
        Ok(replay_tail(name, table_id, &tail, &self.invariants)?)
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
        Ok(self
            .load_commits(name)?
            .iter()
            .map(Commit::info)
            .collect())
    }
}
