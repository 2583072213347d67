// Table Schemas
//
// Ordered, uniquely named column declarations. Row values are
// positionally aligned with the schema they were written under.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::value::ColumnType;

/// Errors raised while building schemas, rows and batches.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),

    #[error("invalid table name `{0}`")]
    InvalidTableName(String),

    #[error("row {row} has {actual} values, schema has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row {row} column `{column}` holds a {actual} value, column is {expected}")]
    ValueType {
        row: usize,
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("added column `{0}` must be nullable")]
    AddedColumnNotNullable(String),
}

/// A single column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn nullable(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self::new(name, data_type, true)
    }

    pub fn not_null(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self::new(name, data_type, false)
    }
}

/// Ordered list of fields with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Field>", into = "Vec<Field>")]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, rejecting repeated column names.
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    /// Schema from fields whose names are known to be unique.
    pub(crate) fn from_unique_fields(fields: Vec<Field>) -> Self {
        debug_assert!(
            fields
                .iter()
                .enumerate()
                .all(|(i, f)| fields[..i].iter().all(|g| g.name != f.name)),
            "duplicate column name"
        );
        Self { fields }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Column names as a set.
    pub fn column_names(&self) -> BTreeSet<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Schema extended with `delta` at the end.
    ///
    /// Added columns must be nullable: rows written before the
    /// change read back as null for them.
    pub fn with_added_fields(&self, delta: &[Field]) -> Result<Schema, SchemaError> {
        if let Some(field) = delta.iter().find(|f| !f.nullable) {
            return Err(SchemaError::AddedColumnNotNullable(field.name.clone()));
        }
        let mut fields = self.fields.clone();
        fields.extend(delta.iter().cloned());
        Schema::new(fields)
    }

    /// True when `self` is `other` followed by zero or more nullable columns.
    pub fn extends(&self, other: &Schema) -> bool {
        self.fields.len() >= other.fields.len()
            && self.fields[..other.fields.len()] == other.fields[..]
            && self.fields[other.fields.len()..].iter().all(|f| f.nullable)
    }
}

impl TryFrom<Vec<Field>> for Schema {
    type Error = SchemaError;

    fn try_from(fields: Vec<Field>) -> Result<Self, Self::Error> {
        Schema::new(fields)
    }
}

impl From<Schema> for Vec<Field> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}

/// Comma-separated, backtick-quoted column list for messages.
pub(crate) fn column_list<'a, I>(columns: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    columns
        .into_iter()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Schema {
        Schema::new(vec![
            Field::not_null("date", ColumnType::Date),
            Field::nullable("serial_number", ColumnType::String),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_columns_rejected() {
        let err = Schema::new(vec![
            Field::nullable("a", ColumnType::Int64),
            Field::nullable("a", ColumnType::String),
        ])
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateColumn("a".into()));
    }

    #[test]
    fn added_fields_append_at_end() {
        let evolved = base()
            .with_added_fields(&[Field::nullable("ahab", ColumnType::String)])
            .unwrap();
        assert_eq!(evolved.index_of("ahab"), Some(2));
        assert!(evolved.extends(&base()));
        assert!(!base().extends(&evolved));
    }

    #[test]
    fn added_fields_must_be_nullable() {
        let err = base()
            .with_added_fields(&[Field::not_null("ahab", ColumnType::String)])
            .unwrap_err();
        assert_eq!(err, SchemaError::AddedColumnNotNullable("ahab".into()));
    }

    #[test]
    fn retyped_column_does_not_extend() {
        let retyped = Schema::new(vec![
            Field::not_null("date", ColumnType::String),
            Field::nullable("serial_number", ColumnType::String),
        ])
        .unwrap();
        assert!(!retyped.extends(&base()));
    }

    #[test]
    fn deserialization_checks_uniqueness() {
        let json = r#"[
            {"name": "a", "data_type": "int64", "nullable": true},
            {"name": "a", "data_type": "date", "nullable": true}
        ]"#;
        assert!(serde_json::from_str::<Schema>(json).is_err());
    }
}
