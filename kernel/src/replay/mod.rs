// Deterministic Replay Engine
//
// Replays commits while enforcing invariants and produces the table
// snapshot they describe. An overwrite carries the complete row set and
// schema, so replay may start at the newest one instead of at creation.

use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::log::{Commit, Operation};
use crate::table::{Snapshot, TableHead, TableId, TableName};

/// Errors that can occur during replay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("commit log for `{0}` is empty")]
    EmptyLog(TableName),

    #[error("commit {0} applied before the table was created")]
    MissingCreate(u64),

    #[error("replay cannot start at append commit {0}")]
    MissingBase(u64),
}

/// Apply a single, already validated commit on top of `previous`.
pub fn advance(
    name: &TableName,
    previous: Option<Snapshot>,
    commit: &Commit,
) -> Result<Snapshot, ReplayError> {
    match (&commit.operation, previous) {
        (Operation::Create { table_id }, _) => Ok(Snapshot {
            table_id: *table_id,
            name: name.clone(),
            version: commit.version,
            schema: commit.schema.clone(),
            rows: commit.rows.clone(),
        }),
        (Operation::Append, Some(mut snapshot)) => {
            // Columns added by this commit read back as null for older rows.
            let width = commit.schema.len();
            if width > snapshot.schema.len() {
                for row in &mut snapshot.rows {
                    row.pad_to(width);
                }
            }
            snapshot.rows.extend(commit.rows.iter().cloned());
            snapshot.schema = commit.schema.clone();
            snapshot.version = commit.version;
            Ok(snapshot)
        }
        (Operation::Overwrite, Some(mut snapshot)) => {
            snapshot.rows = commit.rows.clone();
            snapshot.schema = commit.schema.clone();
            snapshot.version = commit.version;
            Ok(snapshot)
        }
        (_, None) => Err(ReplayError::MissingCreate(commit.version)),
    }
}

/// Validate `commit` against `previous` and apply it.
pub fn apply_commit(
    name: &TableName,
    previous: Option<Snapshot>,
    commit: &Commit,
    invariants: &InvariantEngine,
) -> Result<Snapshot, ReplayError> {
    let head = previous.as_ref().map(Snapshot::head);
    invariants.evaluate(head.as_ref(), commit)?;
    advance(name, previous, commit)
}

/// Replay an ordered commit log from creation and derive the snapshot
/// it ends at.
pub fn replay_snapshot(
    name: &TableName,
    commits: &[Commit],
    invariants: &InvariantEngine,
) -> Result<Snapshot, ReplayError> {
    let mut current: Option<Snapshot> = None;

    for commit in commits {
        current = Some(apply_commit(name, current, commit, invariants)?);
    }

    current.ok_or_else(|| ReplayError::EmptyLog(name.clone()))
}

/// Replay the tail of a commit log that starts at a create or an
/// overwrite, skipping everything the starting commit replaced.
///
/// `table_id` identifies the table when the tail starts at an
/// overwrite. The overwrite is checked on its own: its schema and rows
/// must agree, but the schema it replaced is not available.
pub fn replay_tail(
    name: &TableName,
    table_id: TableId,
    commits: &[Commit],
    invariants: &InvariantEngine,
) -> Result<Snapshot, ReplayError> {
    let (first, rest) = commits
        .split_first()
        .ok_or_else(|| ReplayError::EmptyLog(name.clone()))?;

    match first.operation {
        Operation::Create { .. } => return replay_snapshot(name, commits, invariants),
        Operation::Append => return Err(ReplayError::MissingBase(first.version)),
        Operation::Overwrite => {}
    }

    let anchor = TableHead {
        table_id,
        version: first
            .version
            .checked_sub(1)
            .ok_or(ReplayError::MissingCreate(first.version))?,
        schema: first.schema.clone(),
    };
    invariants.evaluate(Some(&anchor), first)?;

    let mut current = Snapshot {
        table_id,
        name: name.clone(),
        version: first.version,
        schema: first.schema.clone(),
        rows: first.rows.clone(),
    };
    for commit in rest {
        current = apply_commit(name, Some(current), commit, invariants)?;
    }
    Ok(current)
}
