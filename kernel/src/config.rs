// Ingest Configuration
//
// Declares which table to maintain, how raw records are cast, which
// column contract appends must satisfy, which columns identify
// duplicates and how write conflicts are retried.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::contract::ColumnContract;
use crate::normalize::CastMode;
use crate::retry::RetryPolicy;
use crate::table::TableName;

const HARD_DRIVE_COLUMNS: [&str; 5] = ["date", "serial_number", "model", "capacity_bytes", "failure"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration loaded from JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub table: TableName,
    pub store_root: PathBuf,
    pub key_columns: Vec<String>,
    pub contract: ColumnContract,
    pub cast_mode: CastMode,
    pub passthrough_columns: bool,
    pub retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl IngestConfig {
    /// Built-in configuration for the hard-drive telemetry table.
    pub fn default_config() -> Self {
        Self {
            table: TableName("backblaze_hard_drives".to_string()),
            store_root: PathBuf::from("warehouse/test.db"),
            key_columns: HARD_DRIVE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            contract: ColumnContract::new(HARD_DRIVE_COLUMNS, Vec::<String>::new()),
            cast_mode: CastMode::Lenient,
            passthrough_columns: false,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_columns.is_empty() {
            return Err(ConfigError::Invalid("key_columns must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if let Some(col) = self.contract.required.intersection(&self.contract.optional).next() {
            return Err(ConfigError::Invalid(format!(
                "column `{col}` is both required and optional"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_hard_drive_table() {
        let config = IngestConfig::default_config();
        assert_eq!(config.table.as_str(), "backblaze_hard_drives");
        assert_eq!(config.key_columns.len(), 5);
        assert!(config.contract.required.contains("capacity_bytes"));
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = IngestConfig::from_json_str(
            r#"{
                "table": "drives_2022",
                "contract": { "required": ["date", "serial_number"], "optional": ["ahab"] },
                "retry": { "max_attempts": 2 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.table.as_str(), "drives_2022");
        assert!(config.contract.optional.contains("ahab"));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, RetryPolicy::default().initial_backoff_ms);
        assert_eq!(config.cast_mode, CastMode::Lenient);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(IngestConfig::from_json_str(r#"{ "table": "../etc" }"#).is_err());
        assert!(IngestConfig::from_json_str(r#"{ "key_columns": [] }"#).is_err());
        assert!(IngestConfig::from_json_str(
            r#"{ "contract": { "required": ["a"], "optional": ["a"] } }"#
        )
        .is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = IngestConfig::load(Path::new("/nonexistent/tablekeeper.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tablekeeper.json"));
    }
}
