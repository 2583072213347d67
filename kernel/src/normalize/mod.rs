// Record Normalization
//
// Casts raw string records (one header row plus data rows) into typed
// batches for a target schema, following SQL cast rules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::table::{Batch, ColumnType, Field, Row, Schema, SchemaError, Value};

/// What to do with a field that does not parse as its column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastMode {
    /// Store null, as a SQL cast does.
    #[default]
    Lenient,

    /// Fail the whole batch.
    Strict,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("input is missing column `{0}`")]
    MissingColumn(String),

    #[error("line {line}: expected {expected} fields, found {actual}")]
    RaggedRecord {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}: cannot cast {value:?} in column `{column}` to {target}")]
    Cast {
        line: usize,
        column: String,
        value: String,
        target: ColumnType,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Schema of the daily hard-drive telemetry table.
pub fn hard_drive_schema() -> Schema {
    Schema::from_unique_fields(vec![
        Field::not_null("date", ColumnType::Date),
        Field::nullable("serial_number", ColumnType::String),
        Field::nullable("model", ColumnType::String),
        Field::nullable("capacity_bytes", ColumnType::Int64),
        Field::nullable("failure", ColumnType::Boolean),
    ])
}

/// Cast one raw field. Blank input is null; `None` means unparseable.
pub fn cast(raw: &str, target: ColumnType) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::Null);
    }

    match target {
        ColumnType::String => Some(Value::String(raw.to_string())),
        ColumnType::Int64 => trimmed.parse::<i64>().ok().map(Value::Int64),
        ColumnType::Boolean => parse_bool(trimmed).map(Value::Boolean),
        ColumnType::Date => parse_date(trimmed).map(Value::Date),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Timestamps keep only their date part.
    let date_part = match raw.char_indices().nth(10) {
        Some((idx, ' ' | 'T')) => &raw[..idx],
        _ => raw,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Casts raw records into batches for a target schema.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    target: Schema,
    mode: CastMode,
    passthrough: bool,
}

impl RecordNormalizer {
    pub fn new(target: Schema) -> Self {
        Self {
            target,
            mode: CastMode::default(),
            passthrough: false,
        }
    }

    pub fn with_mode(mut self, mode: CastMode) -> Self {
        self.mode = mode;
        self
    }

    /// Carry raw columns outside the target schema as nullable strings.
    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn target(&self) -> &Schema {
        &self.target
    }

    /// Output schema and, per output column, its position in `headers`.
    fn layout(&self, headers: &[String]) -> Result<(Schema, Vec<usize>), NormalizeError> {
        let mut fields = Vec::with_capacity(self.target.len());
        let mut positions = Vec::with_capacity(self.target.len());

        for field in self.target.fields() {
            let pos = headers
                .iter()
                .position(|h| h.trim() == field.name)
                .ok_or_else(|| NormalizeError::MissingColumn(field.name.clone()))?;
            fields.push(field.clone());
            positions.push(pos);
        }

        if self.passthrough {
            for (pos, header) in headers.iter().enumerate() {
                let name = header.trim();
                if !self.target.contains(name) {
                    fields.push(Field::nullable(name, ColumnType::String));
                    positions.push(pos);
                }
            }
        }

        Ok((Schema::new(fields)?, positions))
    }

    /// Normalize data records. Lines are numbered from 2, the header
    /// being line 1.
    pub fn normalize<I>(&self, headers: &[String], records: I) -> Result<Batch, NormalizeError>
    where
        I: IntoIterator,
        I::Item: AsRef<[String]>,
    {
        let (schema, positions) = self.layout(headers)?;
        let mut rows = Vec::new();

        for (idx, record) in records.into_iter().enumerate() {
            let line = idx + 2;
            let record = record.as_ref();
            if record.len() != headers.len() {
                return Err(NormalizeError::RaggedRecord {
                    line,
                    expected: headers.len(),
                    actual: record.len(),
                });
            }

            let mut values = Vec::with_capacity(positions.len());
            for (field, &pos) in schema.fields().iter().zip(&positions) {
                let raw = &record[pos];
                let value = match (cast(raw, field.data_type), self.mode) {
                    (Some(value), _) => value,
                    (None, CastMode::Lenient) => Value::Null,
                    (None, CastMode::Strict) => {
                        return Err(NormalizeError::Cast {
                            line,
                            column: field.name.clone(),
                            value: raw.clone(),
                            target: field.data_type,
                        })
                    }
                };
                values.push(value);
            }
            rows.push(Row::new(values));
        }

        Ok(Batch::new(schema, rows)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn headers() -> Vec<String> {
        strings(&[
            "date",
            "serial_number",
            "model",
            "capacity_bytes",
            "failure",
            "smart_9_raw",
        ])
    }

    #[test]
    fn hard_drive_schema_declares_five_columns() {
        let schema = hard_drive_schema();
        assert_eq!(Schema::new(schema.fields().to_vec()).unwrap(), schema);
        assert_eq!(
            schema.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            ["date", "serial_number", "model", "capacity_bytes", "failure"]
        );
        assert!(!schema.field("date").unwrap().nullable);
        assert_eq!(schema.field("capacity_bytes").unwrap().data_type, ColumnType::Int64);
    }

    #[test]
    fn casts_follow_sql_rules() {
        let date = NaiveDate::from_ymd_opt(2022, 7, 1).unwrap();
        assert_eq!(cast("2022-07-01", ColumnType::Date), Some(Value::Date(date)));
        assert_eq!(cast("2022-07-01 13:00:00", ColumnType::Date), Some(Value::Date(date)));
        assert_eq!(cast("07/01/2022", ColumnType::Date), None);
        assert_eq!(cast(" 4000787030016 ", ColumnType::Int64), Some(Value::Int64(4_000_787_030_016)));
        assert_eq!(cast("4e12", ColumnType::Int64), None);
        assert_eq!(cast("0", ColumnType::Boolean), Some(Value::Boolean(false)));
        assert_eq!(cast("TRUE", ColumnType::Boolean), Some(Value::Boolean(true)));
        assert_eq!(cast("maybe", ColumnType::Boolean), None);
        assert_eq!(cast("", ColumnType::Int64), Some(Value::Null));
    }

    #[test]
    fn extra_columns_are_dropped_by_default() {
        let batch = RecordNormalizer::new(hard_drive_schema())
            .normalize(
                &headers(),
                vec![strings(&[
                    "2022-07-01",
                    "PL1331LAGDJ5GH",
                    "HGST HDS5C4040ALE630",
                    "4000787030016",
                    "0",
                    "12345",
                ])],
            )
            .unwrap();

        assert_eq!(batch.schema(), &hard_drive_schema());
        assert_eq!(batch.rows()[0].get(3), Some(&Value::Int64(4_000_787_030_016)));
        assert_eq!(batch.rows()[0].get(4), Some(&Value::Boolean(false)));
    }

    #[test]
    fn passthrough_keeps_extra_columns_as_strings() {
        let batch = RecordNormalizer::new(hard_drive_schema())
            .with_passthrough(true)
            .normalize(
                &headers(),
                vec![strings(&["2022-07-01", "S", "M", "1", "1", "12345"])],
            )
            .unwrap();

        assert_eq!(batch.schema().index_of("smart_9_raw"), Some(5));
        assert_eq!(batch.rows()[0].get(5), Some(&Value::from("12345")));
    }

    #[test]
    fn lenient_mode_nulls_bad_values() {
        let batch = RecordNormalizer::new(hard_drive_schema())
            .normalize(
                &headers(),
                vec![strings(&["2022-07-01", "S", "M", "lots", "1", ""])],
            )
            .unwrap();
        assert_eq!(batch.rows()[0].get(3), Some(&Value::Null));
    }

    #[test]
    fn strict_mode_reports_line_and_column() {
        let err = RecordNormalizer::new(hard_drive_schema())
            .with_mode(CastMode::Strict)
            .normalize(
                &headers(),
                vec![
                    strings(&["2022-07-01", "S", "M", "1", "1", ""]),
                    strings(&["2022-07-01", "S", "M", "lots", "1", ""]),
                ],
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "line 3: cannot cast \"lots\" in column `capacity_bytes` to BIGINT"
        );
    }

    #[test]
    fn missing_column_and_ragged_records_fail() {
        let normalizer = RecordNormalizer::new(hard_drive_schema());
        let err = normalizer
            .normalize(&strings(&["date", "serial_number"]), Vec::<Vec<String>>::new())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::MissingColumn(ref c) if c == "model"));

        let err = normalizer
            .normalize(&headers(), vec![strings(&["2022-07-01"])])
            .unwrap_err();
        assert!(matches!(err, NormalizeError::RaggedRecord { line: 2, expected: 6, actual: 1 }));
    }
}
