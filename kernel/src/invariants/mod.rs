// Commit Invariants
//
// Invariants are pure rules every commit must satisfy against the
// version and schema of the table it is applied to. Rows already in
// the table are never consulted. They run before a commit becomes
// visible and again whenever a commit log is replayed.

use crate::log::{Commit, Operation};
use crate::table::{check_rows, TableHead};

/// Verdict of one invariant on one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// A rule checked against each commit before it is applied.
///
/// Implementations only inspect their arguments, so replaying the same
/// log always yields the same verdicts.
pub trait CommitInvariant: Send + Sync {
    fn name(&self) -> &'static str;

    /// `previous` is `None` when the commit would be the table's first.
    fn validate(&self, previous: Option<&TableHead>, commit: &Commit) -> InvariantResult;
}

/// Ordered set of commit invariants shared by stores and replay.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn CommitInvariant>>,
}

impl InvariantEngine {
    /// Create an engine with no invariants registered.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine with every built-in commit invariant.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(ContiguousVersions);
        engine.register(CreateFirst);
        engine.register(SchemaOnlyGrows);
        engine.register(RowsMatchSchema);
        engine.register(NotNullColumns);
        engine
    }

    /// Add a rule, evaluated after those already registered.
    pub fn register<I: CommitInvariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check `commit` against `previous`, reporting the first rule
    /// that fails.
    pub fn evaluate(
        &self,
        previous: Option<&TableHead>,
        commit: &Commit,
    ) -> Result<(), InvariantViolation> {
        self.invariants
            .iter()
            .find_map(|rule| match rule.validate(previous, commit) {
                InvariantResult::Pass => None,
                InvariantResult::Fail(reason) => Some(InvariantViolation {
                    invariant: rule.name(),
                    version: commit.version,
                    reason,
                }),
            })
            .map_or(Ok(()), Err)
    }
}

/// A commit rejected by a named rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invariant `{invariant}` violated at version {version}: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub version: u64,
    pub reason: String,
}

/// Versions start at 0 and increase by one.
pub struct ContiguousVersions;

impl CommitInvariant for ContiguousVersions {
    fn name(&self) -> &'static str {
        "contiguous-versions"
    }

    fn validate(&self, previous: Option<&TableHead>, commit: &Commit) -> InvariantResult {
        let expected = previous.map_or(0, |p| p.version + 1);
        if commit.version == expected {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail(format!(
                "expected version {expected}, commit carries {}",
                commit.version
            ))
        }
    }
}

/// The first commit creates the table and no later commit does.
pub struct CreateFirst;

impl CommitInvariant for CreateFirst {
    fn name(&self) -> &'static str {
        "create-first"
    }

    fn validate(&self, previous: Option<&TableHead>, commit: &Commit) -> InvariantResult {
        let is_create = matches!(commit.operation, Operation::Create { .. });
        match (previous, is_create) {
            (None, true) | (Some(_), false) => InvariantResult::Pass,
            (None, false) => InvariantResult::Fail("table does not exist yet".into()),
            (Some(_), true) => InvariantResult::Fail("table already created".into()),
        }
    }
}

/// Columns are never removed or retyped; added columns are nullable.
pub struct SchemaOnlyGrows;

impl CommitInvariant for SchemaOnlyGrows {
    fn name(&self) -> &'static str {
        "schema-only-grows"
    }

    fn validate(&self, previous: Option<&TableHead>, commit: &Commit) -> InvariantResult {
        match previous {
            Some(prev) if !commit.schema.extends(&prev.schema) => InvariantResult::Fail(
                "schema must keep existing columns and only add nullable ones".into(),
            ),
            _ => InvariantResult::Pass,
        }
    }
}

/// Commit rows match the commit schema in width and types.
pub struct RowsMatchSchema;

impl CommitInvariant for RowsMatchSchema {
    fn name(&self) -> &'static str {
        "rows-match-schema"
    }

    fn validate(&self, _previous: Option<&TableHead>, commit: &Commit) -> InvariantResult {
        match check_rows(&commit.schema, &commit.rows) {
            Ok(()) => InvariantResult::Pass,
            Err(err) => InvariantResult::Fail(err.to_string()),
        }
    }
}

/// Non-nullable columns never receive nulls.
pub struct NotNullColumns;

impl CommitInvariant for NotNullColumns {
    fn name(&self) -> &'static str {
        "not-null-columns"
    }

    fn validate(&self, _previous: Option<&TableHead>, commit: &Commit) -> InvariantResult {
        for (idx, field) in commit.schema.fields().iter().enumerate() {
            if field.nullable {
                continue;
            }
            let has_null = commit
                .rows
                .iter()
                .any(|row| row.get(idx).map_or(false, |v| v.is_null()));
            if has_null {
                return InvariantResult::Fail(format!("null written to `{}`", field.name));
            }
        }
        InvariantResult::Pass
    }
}
