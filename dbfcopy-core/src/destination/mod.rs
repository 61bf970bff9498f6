//! Destination traits and the SQL Server implementation.
//!
//! The pipeline only talks to `Connector` and `Destination`; the SQL Server
//! client lives behind the `mssql` feature.
//!
//! # Module Structure
//! - `config`: connection settings and authentication mode
//! - `mssql`: tiberius-backed connector (feature `mssql`)

use async_trait::async_trait;

use crate::Result;
use crate::models::SanitizedRow;

pub mod config;

#[cfg(feature = "mssql")]
pub mod mssql;

pub use config::{AuthMode, ConnectionConfig, DEFAULT_PORT};

#[cfg(feature = "mssql")]
pub use mssql::MssqlConnector;

/// Opens connections to the destination database.
///
/// # Object Safety
/// This trait is object-safe, allowing `Box<dyn Connector>`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection.
    ///
    /// # Errors
    /// Returns a `Connection` error if the server is unreachable or rejects the login.
    async fn connect(&self) -> Result<Box<dyn Destination>>;

    /// Human readable target for logs, without credentials.
    fn describe(&self) -> String;
}

/// An open connection to the destination database.
#[async_trait]
pub trait Destination: Send {
    /// Executes a statement batch and returns the rows affected.
    ///
    /// # Errors
    /// Returns a `Query` error if the server rejects the statement.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Bulk-inserts rows into `table` and returns the count the server acknowledged.
    ///
    /// Row values are matched positionally to the table's non-identity columns.
    ///
    /// # Errors
    /// Returns a `BulkWrite` error carrying the rows acknowledged before the failure.
    async fn bulk_write(&mut self, table: &str, rows: Vec<SanitizedRow>) -> Result<u64>;

    /// Closes the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}
