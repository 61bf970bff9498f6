//! Core pipeline for importing dBase (DBF) tables into SQL Server.
//!
//! The pipeline derives a destination schema from the source columns,
//! optionally truncates or recreates the destination table, then streams
//! records through a lossy-but-non-fatal sanitizer into batched bulk writes.
//!
//! # Architecture
//! - `schema`: source → destination type mapping and DDL
//! - `sanitize`: per-row value coercion
//! - `lifecycle`: truncate and create-or-replace
//! - `load`: run orchestration and accounting
//! - `source` / `destination`: the DBF reader and the SQL Server writer
//!
//! # Security Guarantees
//! - Passwords are zeroized on drop and never logged or displayed

pub mod destination;
pub mod error;
pub mod lifecycle;
pub mod load;
pub mod logging;
pub mod models;
pub mod sanitize;
pub mod schema;
pub mod security;
pub mod source;

// Re-export commonly used types
pub use destination::{AuthMode, ConnectionConfig, Connector, Destination};
pub use error::{DbfCopyError, Result};
pub use lifecycle::TableLifecycleManager;
pub use load::{BulkCopy, BulkLoader, LoadOptions};
pub use models::{
    CoercionCounts, ColumnSchema, DestinationColumn, DestinationSchema, DestinationType,
    FieldValue, LoadResult, LoadStatus, LoadSummary, RunPhase, SanitizedRow, SourceType,
    SqlValue,
};
pub use sanitize::RecordSanitizer;
pub use schema::{create_or_replace_ddl, derive_schema};
pub use source::{DbfOptions, DbfReader, RecordSource};

#[cfg(feature = "mssql")]
pub use destination::MssqlConnector;
