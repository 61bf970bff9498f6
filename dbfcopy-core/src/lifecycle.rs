//! Destination table lifecycle: truncate and create-or-replace.
//!
//! Statements come from the schema mapper; failures are reported as
//! `Truncate` / `CreateTable` errors wrapping the destination's own error.

use std::time::{Duration, Instant};

use tracing::info;

use crate::Result;
use crate::destination::Destination;
use crate::error::DbfCopyError;
use crate::logging::format_elapsed;
use crate::models::DestinationSchema;
use crate::schema::{create_or_replace_ddl, truncate_table_sql};

/// Runs table-level statements against one destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLifecycleManager {
    table: String,
}

impl TableLifecycleManager {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Removes all rows from the table and returns how long it took.
    ///
    /// # Errors
    /// Returns `Truncate` if the statement fails.
    pub async fn truncate(&self, destination: &mut dyn Destination) -> Result<Duration> {
        let started = Instant::now();
        destination
            .execute(&truncate_table_sql(&self.table))
            .await
            .map_err(|e| DbfCopyError::Truncate {
                table: self.table.clone(),
                source: Box::new(e),
            })?;

        let elapsed = started.elapsed();
        info!("Truncated table {} in {}", self.table, format_elapsed(elapsed));
        Ok(elapsed)
    }

    /// Drops the table if it exists and creates it from `schema`.
    ///
    /// Running it twice with the same schema leaves the same table definition.
    ///
    /// # Errors
    /// Returns `CreateTable` if either statement fails.
    pub async fn create_or_replace(
        &self,
        destination: &mut dyn Destination,
        schema: &DestinationSchema,
    ) -> Result<Duration> {
        let started = Instant::now();
        destination
            .execute(&create_or_replace_ddl(&self.table, schema))
            .await
            .map_err(|e| DbfCopyError::CreateTable {
                table: self.table.clone(),
                source: Box::new(e),
            })?;

        let elapsed = started.elapsed();
        info!(
            "Created table {} with {} columns in {}",
            self.table,
            schema.columns.len(),
            format_elapsed(elapsed)
        );
        Ok(elapsed)
    }
}
