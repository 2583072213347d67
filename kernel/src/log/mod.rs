// Table Commit Log
//
// Ordered, append-only record of every committed table version.
// Snapshots are never stored directly; they are derived by replaying
// commits (see `replay`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::{Row, Schema, TableId, Version};

/// Kind of mutation a commit performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Table creation. Carries no rows.
    Create { table_id: TableId },

    /// Rows added on top of the previous version.
    Append,

    /// Full replacement of the row set.
    Overwrite,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create { .. } => OperationKind::Create,
            Operation::Append => OperationKind::Append,
            Operation::Overwrite => OperationKind::Overwrite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Append,
    Overwrite,
}

/// One committed version.
///
/// `schema` is the full schema after the commit. For appends `rows`
/// holds only the added rows; for overwrites it holds the whole table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl Commit {
    pub fn info(&self) -> CommitInfo {
        CommitInfo {
            version: self.version,
            timestamp: self.timestamp,
            operation: self.operation.kind(),
            rows: self.rows.len(),
            columns: self.schema.len(),
        }
    }
}

/// Summary of a commit for history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub operation: OperationKind,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: Version, actual: Version },
}

/// In-memory commit log with compare-and-swap on version.
#[derive(Debug, Default, Clone)]
pub struct CommitLog {
    commits: Vec<Commit>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self {
            commits: Vec::new(),
        }
    }

    /// Version the next commit must carry.
    pub fn next_version(&self) -> Version {
        match self.commits.last() {
            Some(last) => last.version + 1,
            None => 0,
        }
    }

    pub fn append(&mut self, commit: Commit) -> Result<(), LogError> {
        let expected = self.next_version();

        if commit.version != expected {
            return Err(LogError::VersionConflict {
                expected,
                actual: commit.version,
            });
        }

        self.commits.push(commit);
        Ok(())
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    /// Commits up to and including `version`.
    pub fn commits_through(&self, version: Version) -> &[Commit] {
        let end = self
            .commits
            .iter()
            .position(|c| c.version > version)
            .unwrap_or(self.commits.len());
        &self.commits[..end]
    }

    pub fn current_version(&self) -> Option<Version> {
        self.commits.last().map(|c| c.version)
    }
}
