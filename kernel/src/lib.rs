// Tablekeeper Kernel
//
// Table-maintenance core for versioned, transactional table stores:
// append-only writes, duplicate elimination and append validation.

pub mod config;
pub mod contract;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod invariants;
pub mod log;
pub mod normalize;
pub mod replay;
pub mod retry;
pub mod store;
pub mod table;
pub mod writer;

pub use contract::{ColumnContract, ValidationError};
pub use coordinator::{Coordinator, IngestSummary};
pub use error::TableError;
pub use store::{FileStore, MemoryStore, StoreError, TableStore};
pub use table::{Batch, ColumnType, Field, Row, Schema, Snapshot, TableName, Value, Version};
