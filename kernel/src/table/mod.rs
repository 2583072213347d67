// Table Data Model
//
// Identities, schemas, rows and snapshots shared by the store and
// every mutation path.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod row;
mod schema;
mod value;

pub use row::{check_rows, Batch, Row};
pub(crate) use schema::column_list;
pub use schema::{Field, Schema, SchemaError};
pub use value::{ColumnType, Value};

/// Logical version of a table. Creation commits version 0.
pub type Version = u64;

/// Stable identifier for a table, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub Uuid);

impl TableId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TableId {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated table name: `[A-Za-z0-9_.-]+`, not starting with `.` or `_`.
///
/// Names double as directory names in file-backed stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(pub(crate) String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self, SchemaError> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name.starts_with(['.', '_'])
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if valid {
            Ok(Self(name))
        } else {
            Err(SchemaError::InvalidTableName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TableName {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TableName::new(value)
    }
}

impl From<TableName> for String {
    fn from(name: TableName) -> Self {
        name.0
    }
}

/// Latest version and declared schema of a table, without its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHead {
    pub table_id: TableId,
    pub version: Version,
    pub schema: Schema,
}

/// Immutable, fully consistent view of a table at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub table_id: TableId,
    pub name: TableName,
    pub version: Version,
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn head(&self) -> TableHead {
        TableHead {
            table_id: self.table_id,
            version: self.version,
            schema: self.schema.clone(),
        }
    }

    /// Values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(move |row| &row.0[idx]))
    }
}
