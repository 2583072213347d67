// Duplicate Elimination
//
// Finds groups of rows that agree on a set of key columns and
// rewrites the table so each group keeps exactly one row. The rewrite
// is a single overwrite commit based on the version that was scanned,
// so a concurrent writer turns it into a write conflict rather than a
// lost update.
//
// Null key values never match anything, another null included.
// Within a group the survivor is the smallest row under the total
// order over all of its values, ties going to the earliest position.
// Survivors keep their original relative order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::TableError;
use crate::store::TableStore;
use crate::table::{Row, Schema, Snapshot, TableName, Value, Version};

/// Rows sharing one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: Vec<Value>,
    /// Positions in the scanned snapshot, ascending.
    pub rows: Vec<usize>,
    /// Position of the row that is kept.
    pub survivor: usize,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Positions that would be removed.
    pub fn removed(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().copied().filter(move |pos| *pos != self.survivor)
    }
}

/// Read-only result of scanning a snapshot for duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub version: Version,
    pub key_columns: Vec<String>,
    pub rows_scanned: usize,
    /// Groups with two or more rows, ordered by key.
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    pub fn is_clean(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of rows a rewrite would remove.
    pub fn removed_count(&self) -> usize {
        self.groups.iter().map(|g| g.len() - 1).sum()
    }

    pub fn removed_positions(&self) -> BTreeSet<usize> {
        self.groups.iter().flat_map(DuplicateGroup::removed).collect()
    }

    /// Keep survivors and ungrouped rows of the scanned row set, in order.
    pub fn retain_survivors(&self, rows: Vec<Row>) -> Vec<Row> {
        let removed = self.removed_positions();
        rows.into_iter()
            .enumerate()
            .filter(|(pos, _)| !removed.contains(pos))
            .map(|(_, row)| row)
            .collect()
    }
}

/// Outcome of a duplicate elimination pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupOutcome {
    /// Version that was scanned.
    pub base_version: Version,
    /// Version written by the rewrite, `None` when nothing changed.
    pub version: Option<Version>,
    pub groups: usize,
    pub removed: usize,
}

fn resolve_keys<K: AsRef<str>>(schema: &Schema, key_columns: &[K]) -> Result<Vec<usize>, TableError> {
    if key_columns.is_empty() {
        return Err(TableError::EmptyKey);
    }

    let unknown: BTreeSet<String> = key_columns
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !schema.contains(name))
        .map(str::to_string)
        .collect();
    if !unknown.is_empty() {
        return Err(TableError::UnknownKeyColumns(unknown));
    }

    let mut indices: Vec<usize> = key_columns
        .iter()
        .filter_map(|name| schema.index_of(name.as_ref()))
        .collect();
    indices.dedup();
    Ok(indices)
}

/// Scan `snapshot` for rows that agree on every key column.
pub fn find_duplicates<K: AsRef<str>>(
    snapshot: &Snapshot,
    key_columns: &[K],
) -> Result<DuplicateReport, TableError> {
    let key_indices = resolve_keys(&snapshot.schema, key_columns)?;

    let mut by_key: BTreeMap<Vec<&Value>, Vec<usize>> = BTreeMap::new();
    for (pos, row) in snapshot.rows.iter().enumerate() {
        let key: Vec<&Value> = key_indices.iter().map(|&idx| &row.0[idx]).collect();
        if key.iter().any(|value| value.is_null()) {
            continue;
        }
        by_key.entry(key).or_default().push(pos);
    }

    let groups = by_key
        .into_iter()
        .filter(|(_, rows)| rows.len() > 1)
        .filter_map(|(key, rows)| {
            let survivor = rows
                .iter()
                .copied()
                .min_by_key(|&pos| (&snapshot.rows[pos], pos))?;
            Some(DuplicateGroup {
                key: key.into_iter().cloned().collect(),
                rows,
                survivor,
            })
        })
        .collect();

    Ok(DuplicateReport {
        version: snapshot.version,
        key_columns: key_columns.iter().map(|k| k.as_ref().to_string()).collect(),
        rows_scanned: snapshot.rows.len(),
        groups,
    })
}

/// Remove duplicate rows from `table` in a single attempt.
///
/// Reads the latest snapshot, keeps one row per duplicate group and
/// overwrites the table based on the scanned version. No version is
/// written when the table has no duplicates.
pub fn kill_duplicates<S, K>(
    store: &S,
    table: &TableName,
    key_columns: &[K],
) -> Result<DedupOutcome, TableError>
where
    S: TableStore + ?Sized,
    K: AsRef<str>,
{
    let snapshot = store.read_snapshot(table)?;
    let report = find_duplicates(&snapshot, key_columns)?;
    debug!(
        table = %table,
        version = snapshot.version,
        rows = report.rows_scanned,
        groups = report.groups.len(),
        "duplicate scan finished"
    );

    let mut outcome = DedupOutcome {
        base_version: snapshot.version,
        version: None,
        groups: report.groups.len(),
        removed: report.removed_count(),
    };
    if report.is_clean() {
        info!(table = %table, version = snapshot.version, "no duplicates found");
        return Ok(outcome);
    }

    let retained = report.retain_survivors(snapshot.rows);
    let version = store.commit_overwrite(table, snapshot.version, retained, &[])?;
    outcome.version = Some(version);

    info!(
        table = %table,
        version,
        groups = outcome.groups,
        removed = outcome.removed,
        "duplicates removed"
    );
    Ok(outcome)
}

/// True when `key_columns` identify every row: no duplicate groups
/// and no null key values.
pub fn is_composite_key_candidate<S, K>(
    store: &S,
    table: &TableName,
    key_columns: &[K],
) -> Result<bool, TableError>
where
    S: TableStore + ?Sized,
    K: AsRef<str>,
{
    let snapshot = store.read_snapshot(table)?;
    is_unique_key(&snapshot, key_columns)
}

fn is_unique_key<K: AsRef<str>>(snapshot: &Snapshot, key_columns: &[K]) -> Result<bool, TableError> {
    let key_indices = resolve_keys(&snapshot.schema, key_columns)?;
    let has_null_key = snapshot
        .rows
        .iter()
        .any(|row| key_indices.iter().any(|&idx| row.0[idx].is_null()));
    Ok(!has_null_key && find_duplicates(snapshot, key_columns)?.is_clean())
}

/// Smallest set of columns, outside `exclude`, that uniquely identifies
/// every row. Candidates are tried by size, then in schema order.
pub fn find_composite_key_candidates<K: AsRef<str>>(
    snapshot: &Snapshot,
    exclude: &[K],
) -> Result<Option<Vec<String>>, TableError> {
    let (indices, columns): (Vec<usize>, Vec<&str>) = snapshot
        .schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, f)| (idx, f.name.as_str()))
        .filter(|(_, name)| !exclude.iter().any(|e| e.as_ref() == *name))
        .unzip();

    // Rows equal on every remaining column are equal on every subset.
    if has_repeated_projection(snapshot, &indices) {
        return Ok(None);
    }

    for size in 1..=columns.len() {
        for combination in combinations(columns.len(), size) {
            let candidate: Vec<&str> = combination.iter().map(|&i| columns[i]).collect();
            if is_unique_key(snapshot, &candidate)? {
                return Ok(Some(candidate.into_iter().map(str::to_string).collect()));
            }
        }
    }
    Ok(None)
}

/// True when two rows agree on all of `indices`, nulls included.
fn has_repeated_projection(snapshot: &Snapshot, indices: &[usize]) -> bool {
    let mut seen = BTreeSet::new();
    snapshot.rows.iter().any(|row| {
        let projected: Vec<&Value> = indices.iter().map(|&idx| &row.0[idx]).collect();
        !seen.insert(projected)
    })
}

/// Index combinations of `size` out of `n`, in lexicographic order.
fn combinations(n: usize, size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current: Vec<usize> = (0..size).collect();
    if size == 0 || size > n {
        return out;
    }
    loop {
        out.push(current.clone());
        // Rightmost position that can still move forward.
        let Some(i) = (0..size).rev().find(|&i| current[i] < n - size + i) else {
            return out;
        };
        current[i] += 1;
        for j in i + 1..size {
            current[j] = current[j - 1] + 1;
        }
    }
}
