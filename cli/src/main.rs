use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tablekeeper_kernel::config::IngestConfig;
use tablekeeper_kernel::dedup::DuplicateReport;
use tablekeeper_kernel::log::CommitInfo;
use tablekeeper_kernel::normalize::{hard_drive_schema, RecordNormalizer};
use tablekeeper_kernel::{
    Batch, ColumnContract, Coordinator, FileStore, Snapshot, TableError, TableStore,
    ValidationError, Version,
};

/// Tablekeeper CLI
#[derive(Parser, Debug)]
#[command(name = "tablekeeper")]
#[command(about = "Hard-drive telemetry ingest and table maintenance", long_about = None)]
struct Cli {
    /// Path to ingest config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root directory (overrides the config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the hard-drive table
    Create {
        /// Drop the table first if it exists
        #[arg(long)]
        replace: bool,
    },

    /// Append CSV files to the table
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Remove duplicates after appending
        #[arg(long)]
        dedup: bool,
    },

    /// Check a CSV file against the column contract without writing
    Validate { file: PathBuf },

    /// Remove duplicate rows
    Dedup {
        /// Key columns (defaults to the configured keys)
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,

        /// Report duplicate groups without rewriting the table
        #[arg(long)]
        dry_run: bool,
    },

    /// Print rows of the table
    Show {
        /// Read an older version
        #[arg(long)]
        version: Option<Version>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List the table's commits
    History,
}

#[derive(Debug, Serialize)]
struct CreateOutput {
    table: String,
    version: Version,
    created: bool,
}

#[derive(Debug, Serialize)]
struct ValidateOutput {
    file: PathBuf,
    rows: usize,
    columns: Vec<String>,
    valid: bool,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    missing_required: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    unrecognized: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
    table: String,
    version: Version,
    total_rows: usize,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct HistoryOutput {
    table: String,
    commits: Vec<CommitInfo>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // ----------------------------
    // Load config
    // ----------------------------
    let mut config = match &cli.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default_config(),
    };
    if let Some(root) = cli.store {
        config.store_root = root;
    }

    let store = FileStore::open(&config.store_root)
        .with_context(|| format!("cannot open store at {}", config.store_root.display()))?;
    let coordinator = Coordinator::from_config(&store, &config);

    // ----------------------------
    // Run command
    // ----------------------------
    let output = match cli.command {
        Command::Create { replace } => serde_json::to_value(create(&store, &config, replace)?)?,

        Command::Ingest { files, dedup } => {
            let batches = files
                .iter()
                .map(|path| read_batch(path, &config))
                .collect::<Result<Vec<_>>>()?;
            let summary = if dedup {
                coordinator.ingest_and_deduplicate(batches, &config.contract, &config.key_columns)?
            } else {
                coordinator.ingest(batches, &config.contract)?
            };
            serde_json::to_value(summary)?
        }

        Command::Validate { file } => {
            let batch = read_batch(&file, &config)?;
            serde_json::to_value(validate(&coordinator, file, &batch, &config.contract)?)?
        }

        Command::Dedup { keys, dry_run } => {
            let keys = if keys.is_empty() {
                config.key_columns.clone()
            } else {
                keys
            };
            if dry_run {
                let report: DuplicateReport = coordinator.find_duplicates(&keys)?;
                serde_json::to_value(report)?
            } else {
                serde_json::to_value(coordinator.kill_duplicates(&keys)?)?
            }
        }

        Command::Show { version, limit } => {
            let snapshot = match version {
                Some(version) => store.read_snapshot_at(&config.table, version)?,
                None => store.read_snapshot(&config.table)?,
            };
            serde_json::to_value(show(&snapshot, limit))?
        }

        Command::History => serde_json::to_value(HistoryOutput {
            table: config.table.to_string(),
            commits: store.history(&config.table)?,
        })?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Create the hard-drive table. An existing table is kept unless
/// `replace` is set.
fn create(store: &FileStore, config: &IngestConfig, replace: bool) -> Result<CreateOutput> {
    let table = &config.table;
    if store.table_exists(table)? {
        if !replace {
            return Ok(CreateOutput {
                table: table.to_string(),
                version: store.latest_version(table)?,
                created: false,
            });
        }
        store.drop_table(table)?;
        info!(table = %table, "dropped existing table");
    }

    let snapshot = store.create_table(table, hard_drive_schema())?;
    Ok(CreateOutput {
        table: table.to_string(),
        version: snapshot.version,
        created: true,
    })
}

/// Dry-run the column contract. Rejections are reported in the output;
/// only store failures are errors.
fn validate<S: TableStore + ?Sized>(
    coordinator: &Coordinator<'_, S>,
    file: PathBuf,
    batch: &Batch,
    contract: &ColumnContract,
) -> Result<ValidateOutput> {
    let mut output = ValidateOutput {
        file,
        rows: batch.len(),
        columns: batch.columns().into_iter().collect(),
        valid: true,
        missing_required: BTreeSet::new(),
        unrecognized: BTreeSet::new(),
    };

    match coordinator.validate(batch, contract) {
        Ok(()) => {}
        Err(TableError::Validation(ValidationError::MissingRequiredColumns(columns))) => {
            output.valid = false;
            output.missing_required = columns;
        }
        Err(TableError::Validation(ValidationError::UnrecognizedColumns(columns))) => {
            output.valid = false;
            output.unrecognized = columns;
        }
        Err(err) => return Err(err.into()),
    }
    Ok(output)
}

/// Read a headed CSV file into a normalized batch.
fn read_batch(path: &Path, config: &IngestConfig) -> Result<Batch> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        bail!("{} has no header row", path.display());
    }

    let records = reader
        .records()
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect::<Vec<String>>()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("cannot read {}", path.display()))?;

    let batch = RecordNormalizer::new(hard_drive_schema())
        .with_mode(config.cast_mode)
        .with_passthrough(config.passthrough_columns)
        .normalize(&headers, records)
        .with_context(|| format!("cannot normalize {}", path.display()))?;

    info!(file = %path.display(), rows = batch.len(), "read batch");
    Ok(batch)
}

fn show(snapshot: &Snapshot, limit: usize) -> ShowOutput {
    let names: Vec<&str> = snapshot
        .schema
        .fields()
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    let rows = snapshot
        .rows
        .iter()
        .take(limit)
        .map(|row| {
            names
                .iter()
                .zip(row.values())
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect()
        })
        .collect();

    ShowOutput {
        table: snapshot.name.to_string(),
        version: snapshot.version,
        total_rows: snapshot.len(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tablekeeper_kernel::dedup::find_duplicates;

    const CSV: &str = "date,serial_number,model,capacity_bytes,failure,smart_1_raw\n\
        2022-07-01,PL1331LAGDJ5GH,HGST HDS5C4040ALE630,4000787030016,0,117\n\
        2022-07-01,PL1331LAGDJ5GH,HGST HDS5C4040ALE630,4000787030016,0,117\n\
        2022-07-01,ZA10MCEQ,ST8000DM002,,1,3\n";

    fn setup() -> (tempfile::TempDir, IngestConfig, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("2022-07-01.csv");
        fs::write(&csv_path, CSV).unwrap();
        let config = IngestConfig {
            store_root: dir.path().join("warehouse"),
            ..IngestConfig::default_config()
        };
        (dir, config, csv_path)
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tablekeeper",
            "dedup",
            "--keys",
            "date,serial_number",
            "--store",
            "/tmp/warehouse",
        ])
        .unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/warehouse")));
        match cli.command {
            Command::Dedup { keys, dry_run } => {
                assert_eq!(keys, vec!["date", "serial_number"]);
                assert!(!dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["tablekeeper", "ingest"]).is_err());
    }

    #[test]
    fn csv_file_becomes_typed_batch() {
        let (_dir, config, csv_path) = setup();
        let batch = read_batch(&csv_path, &config).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.schema(), &hard_drive_schema());
        assert!(batch.rows()[2].values()[3].is_null());
    }

    #[test]
    fn ragged_csv_reports_line() {
        let (dir, config, _) = setup();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "date,serial_number,model,capacity_bytes,failure\n2022-07-01,X\n").unwrap();

        let err = read_batch(&path, &config).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "unexpected error: {err:#}");
    }

    #[test]
    fn validate_reports_rejected_columns() {
        let (_dir, mut config, csv_path) = setup();
        let store = FileStore::open(&config.store_root).unwrap();
        create(&store, &config, false).unwrap();
        let coordinator = Coordinator::from_config(&store, &config);

        let batch = read_batch(&csv_path, &config).unwrap();
        let accepted = validate(&coordinator, csv_path.clone(), &batch, &config.contract).unwrap();
        assert!(accepted.valid);
        let json = serde_json::to_value(&accepted).unwrap();
        assert!(json.get("missing_required").is_none());

        let with_ahab = ColumnContract::new(
            config.key_columns.iter().map(String::as_str).chain(["ahab"]),
            Vec::<String>::new(),
        );
        let missing = validate(&coordinator, csv_path.clone(), &batch, &with_ahab).unwrap();
        assert!(!missing.valid);
        assert_eq!(missing.missing_required, BTreeSet::from(["ahab".to_string()]));

        config.passthrough_columns = true;
        let batch = read_batch(&csv_path, &config).unwrap();
        let extra = validate(&coordinator, csv_path, &batch, &config.contract).unwrap();
        assert!(!extra.valid);
        assert_eq!(extra.unrecognized, BTreeSet::from(["smart_1_raw".to_string()]));
        assert_eq!(
            serde_json::to_value(&extra).unwrap()["unrecognized"],
            serde_json::json!(["smart_1_raw"])
        );
        assert_eq!(store.latest_version(&config.table).unwrap(), 0);
    }

    #[test]
    fn create_then_ingest_then_show() {
        let (_dir, config, csv_path) = setup();
        let store = FileStore::open(&config.store_root).unwrap();

        assert!(create(&store, &config, false).unwrap().created);
        assert!(!create(&store, &config, false).unwrap().created);

        let coordinator = Coordinator::from_config(&store, &config);
        let batch = read_batch(&csv_path, &config).unwrap();
        coordinator.ingest(vec![batch], &config.contract).unwrap();

        let snapshot = store.read_snapshot(&config.table).unwrap();
        assert_eq!(find_duplicates(&snapshot, &config.key_columns).unwrap().removed_count(), 1);

        let output = show(&snapshot, 2);
        assert_eq!(output.total_rows, 3);
        assert_eq!(output.rows.len(), 2);
        assert_eq!(output.rows[0]["date"], serde_json::json!("2022-07-01"));
        assert_eq!(output.rows[0]["failure"], serde_json::json!(false));

        let replaced = create(&store, &config, true).unwrap();
        assert!(replaced.created);
        assert_eq!(replaced.version, 0);
        assert!(store.read_snapshot(&config.table).unwrap().is_empty());
    }
}
