// Table Coordinator
//
// Sequences validation, appends and duplicate elimination against one
// table, retrying each whole operation on write conflicts:
// validate → append (schema merge) → kill duplicates

use serde::Serialize;
use tracing::info;

use crate::config::IngestConfig;
use crate::contract::{self, ColumnContract};
use crate::dedup::{self, DedupOutcome, DuplicateReport};
use crate::error::TableError;
use crate::retry::RetryPolicy;
use crate::store::TableStore;
use crate::table::{Batch, TableName, Version};
use crate::writer::{self, SchemaMode};

/// Result of ingesting a sequence of batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub batches: usize,
    pub rows_appended: usize,
    /// Latest table version after the last append.
    pub version: Version,
    pub dedup: Option<DedupOutcome>,
}

/// Caller-supplied handle binding a store, a table and a retry policy.
pub struct Coordinator<'s, S: TableStore + ?Sized> {
    store: &'s S,
    table: TableName,
    retry: RetryPolicy,
}

impl<'s, S: TableStore + ?Sized> Coordinator<'s, S> {
    pub fn new(store: &'s S, table: TableName, retry: RetryPolicy) -> Self {
        Self {
            store,
            table,
            retry,
        }
    }

    pub fn from_config(store: &'s S, config: &IngestConfig) -> Self {
        Self::new(store, config.table.clone(), config.retry.clone())
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn store(&self) -> &'s S {
        self.store
    }

    /// Dry-run validation of `batch` against the current table schema.
    pub fn validate(&self, batch: &Batch, contract: &ColumnContract) -> Result<(), TableError> {
        contract::validate(self.store, &self.table, batch, contract)
    }

    /// Append without schema changes.
    pub fn append(&self, batch: &Batch) -> Result<Version, TableError> {
        self.retry
            .run(|_| writer::append(self.store, &self.table, batch, SchemaMode::Strict))
    }

    /// Validate `batch` and append it, adding sanctioned new columns.
    ///
    /// Validation is repeated on every attempt because a conflicting
    /// commit may have changed the declared schema.
    pub fn validated_append(
        &self,
        batch: &Batch,
        contract: &ColumnContract,
    ) -> Result<Version, TableError> {
        self.retry.run(|_| {
            contract::validate(self.store, &self.table, batch, contract)?;
            writer::append(self.store, &self.table, batch, SchemaMode::Merge)
        })
    }

    /// Scan for duplicates without writing.
    pub fn find_duplicates<K: AsRef<str>>(
        &self,
        key_columns: &[K],
    ) -> Result<DuplicateReport, TableError> {
        let snapshot = self.store.read_snapshot(&self.table)?;
        dedup::find_duplicates(&snapshot, key_columns)
    }

    /// Remove duplicates, re-reading and recomputing on every conflict.
    pub fn kill_duplicates<K: AsRef<str>>(
        &self,
        key_columns: &[K],
    ) -> Result<DedupOutcome, TableError> {
        self.retry
            .run(|_| dedup::kill_duplicates(self.store, &self.table, key_columns))
    }

    /// Validated-append every batch in order, stopping at the first
    /// rejection. Batches committed before a failure stay committed.
    pub fn ingest<I>(&self, batches: I, contract: &ColumnContract) -> Result<IngestSummary, TableError>
    where
        I: IntoIterator<Item = Batch>,
    {
        let mut summary = IngestSummary {
            version: self.store.latest_version(&self.table)?,
            ..IngestSummary::default()
        };

        for batch in batches {
            summary.version = self.validated_append(&batch, contract)?;
            summary.batches += 1;
            summary.rows_appended += batch.len();
        }

        info!(
            table = %self.table,
            batches = summary.batches,
            rows = summary.rows_appended,
            version = summary.version,
            "ingest finished"
        );
        Ok(summary)
    }

    /// Ingest, then remove duplicates over `key_columns`.
    pub fn ingest_and_deduplicate<I, K>(
        &self,
        batches: I,
        contract: &ColumnContract,
        key_columns: &[K],
    ) -> Result<IngestSummary, TableError>
    where
        I: IntoIterator<Item = Batch>,
        K: AsRef<str>,
    {
        let mut summary = self.ingest(batches, contract)?;
        let outcome = self.kill_duplicates(key_columns)?;
        if let Some(version) = outcome.version {
            summary.version = version;
        }
        summary.dedup = Some(outcome);
        Ok(summary)
    }
}
