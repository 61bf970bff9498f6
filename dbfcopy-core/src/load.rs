//! Bulk load orchestration.
//!
//! A run moves through `Idle → Connected → [Truncating] → [CreatingSchema]
//! → Loading` and ends `Completed` or `Failed`. The schema is derived before
//! any connection is opened, so unmapped source types fail fast. Rows are
//! streamed from the source through the sanitizer and written in batches;
//! the acknowledged count survives a mid-stream failure.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::Result;
use crate::destination::{Connector, Destination};
use crate::error::DbfCopyError;
use crate::lifecycle::TableLifecycleManager;
use crate::logging::format_elapsed;
use crate::models::{
    CoercionCounts, DestinationSchema, LoadResult, LoadStatus, RunPhase, SanitizedRow,
};
use crate::sanitize::RecordSanitizer;
use crate::schema::derive_schema;
use crate::source::RecordSource;

/// Rows per bulk write
pub const DEFAULT_BATCH_SIZE: usize = 5000;
/// Time allowed for one bulk write
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-run load settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Destination table, optionally schema-qualified
    pub table: String,
    /// Empty the table before loading
    pub truncate: bool,
    /// Drop and recreate the table from the source schema
    pub create_table: bool,
    /// Limit for each bulk write; zero disables the limit
    pub bulk_timeout: Duration,
    pub batch_size: usize,
}

impl LoadOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            truncate: false,
            create_table: false,
            bulk_timeout: DEFAULT_BULK_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn with_create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }

    pub fn with_bulk_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty table name or a zero batch size.
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(DbfCopyError::invalid_argument("table name cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(DbfCopyError::invalid_argument(
                "batch size must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Bulk-write handle bound to one table and timeout.
///
/// Tracks the rows acknowledged so far; failures report that count.
pub struct BulkCopy<'a> {
    destination: &'a mut dyn Destination,
    table: &'a str,
    timeout: Option<Duration>,
    copied: u64,
}

impl<'a> BulkCopy<'a> {
    /// A zero `timeout` means no limit.
    pub fn new(destination: &'a mut dyn Destination, table: &'a str, timeout: Duration) -> Self {
        Self {
            destination,
            table,
            timeout: (!timeout.is_zero()).then_some(timeout),
            copied: 0,
        }
    }

    /// Rows acknowledged so far
    pub fn copied(&self) -> u64 {
        self.copied
    }

    /// Writes one batch and returns the acknowledged count.
    ///
    /// # Errors
    /// Returns `BulkWriteTimeout` when the batch exceeds the timeout and
    /// `BulkWrite` for any other failure; both carry the rows acknowledged
    /// by earlier batches.
    pub async fn write_batch(&mut self, rows: Vec<SanitizedRow>) -> Result<u64> {
        let sent = rows.len() as u64;
        let write = self.destination.bulk_write(self.table, rows);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(DbfCopyError::BulkWriteTimeout {
                        table: self.table.to_string(),
                        timeout: limit,
                        copied: self.copied,
                    });
                }
            },
            None => write.await,
        };

        let mut acknowledged = outcome.map_err(|e| self.with_prior_copies(e))?;
        if acknowledged > sent {
            warn!(
                "Destination acknowledged {} rows for a batch of {}",
                acknowledged, sent
            );
            acknowledged = sent;
        }
        self.copied += acknowledged;
        Ok(acknowledged)
    }

    fn with_prior_copies(&self, error: DbfCopyError) -> DbfCopyError {
        match error {
            DbfCopyError::BulkWrite {
                table,
                copied,
                source,
            } => DbfCopyError::BulkWrite {
                table,
                copied: self.copied + copied,
                source,
            },
            other => DbfCopyError::BulkWrite {
                table: self.table.to_string(),
                copied: self.copied,
                source: Box::new(other),
            },
        }
    }
}

/// Accounting carried through a run, kept intact when a phase fails.
struct Progress {
    started: Instant,
    phase: RunPhase,
    copied: u64,
    read: u64,
    coercions: CoercionCounts,
}

impl Progress {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            phase: RunPhase::Idle,
            copied: 0,
            read: 0,
            coercions: CoercionCounts::default(),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        info!(
            "Phase: {} (at {})",
            phase,
            format_elapsed(self.started.elapsed())
        );
        self.phase = phase;
    }
}

/// Drives one load run from source to destination table.
///
/// # Example
/// ```rust,no_run
/// use dbfcopy_core::destination::{AuthMode, ConnectionConfig, MssqlConnector};
/// use dbfcopy_core::load::{BulkLoader, LoadOptions};
/// use dbfcopy_core::security::Credentials;
/// use dbfcopy_core::source::{DbfOptions, DbfReader};
///
/// # async fn example() -> dbfcopy_core::Result<()> {
/// let auth = AuthMode::Credentialed(Credentials::new("loader".into(), Some("pw".into())));
/// let connector = MssqlConnector::new(ConnectionConfig::from_server("db01", "Staging", auth)?)?;
/// let mut source = DbfReader::open("customers.dbf", DbfOptions::new())?;
///
/// let loader = BulkLoader::new(LoadOptions::new("Customers").with_create_table(true))?;
/// let result = loader.run(&connector, &mut source).await;
/// println!("Copied {} of {} rows", result.copied, result.attempted);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BulkLoader {
    options: LoadOptions,
}

impl BulkLoader {
    /// Creates a loader after validating `options`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the options are invalid.
    pub fn new(options: LoadOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Runs the load and returns its accounting, successful or not.
    pub async fn run<S>(&self, connector: &dyn Connector, source: &mut S) -> LoadResult
    where
        S: RecordSource + ?Sized,
    {
        let mut progress = Progress::new();
        let attempted = source.record_count();
        let outcome = self.execute(connector, source, &mut progress).await;
        let elapsed = progress.started.elapsed();

        let status = match outcome {
            Ok(()) => {
                info!(
                    "Copied {} of {} rows in {}",
                    progress.copied,
                    attempted,
                    format_elapsed(elapsed)
                );
                LoadStatus::Completed
            }
            Err(e) => {
                error!(
                    "Load failed while {} after {} of {} rows: {}",
                    progress.phase,
                    progress.copied,
                    attempted,
                    e.display_chain()
                );
                LoadStatus::Failed {
                    phase: progress.phase,
                    error: e,
                }
            }
        };

        let coercions = progress.coercions;
        if coercions.total() > 0 {
            info!(
                "Coerced values: {} truncated, {} nulled, {} clamped",
                coercions.truncated, coercions.nulled, coercions.clamped
            );
        }

        LoadResult {
            table: self.options.table.clone(),
            attempted,
            copied: progress.copied.min(attempted),
            read: progress.read,
            elapsed,
            coercions,
            status,
        }
    }

    async fn execute<S>(
        &self,
        connector: &dyn Connector,
        source: &mut S,
        progress: &mut Progress,
    ) -> Result<()>
    where
        S: RecordSource + ?Sized,
    {
        let schema = derive_schema(source.columns())?;
        debug!(
            "Derived {} destination columns (identity: {})",
            schema.columns.len(),
            schema
                .identity_column()
                .map_or("none", |column| column.name.as_str())
        );

        info!("Connecting to {}", connector.describe());
        let mut destination = connector.connect().await?;
        progress.enter(RunPhase::Connected);

        let outcome = self
            .load(destination.as_mut(), source, &schema, progress)
            .await;

        // A stalled server may never accept the close; drop the session then
        let limit = self.close_timeout();
        match tokio::time::timeout(limit, destination.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close connection: {}", e.display_chain()),
            Err(_) => warn!(
                "Connection did not close within {}; dropping it",
                format_elapsed(limit)
            ),
        }
        outcome
    }

    /// The bulk timeout, or the default one when bulk writes are unbounded.
    fn close_timeout(&self) -> Duration {
        if self.options.bulk_timeout.is_zero() {
            DEFAULT_BULK_TIMEOUT
        } else {
            self.options.bulk_timeout
        }
    }

    async fn load<S>(
        &self,
        destination: &mut dyn Destination,
        source: &mut S,
        schema: &DestinationSchema,
        progress: &mut Progress,
    ) -> Result<()>
    where
        S: RecordSource + ?Sized,
    {
        let lifecycle = TableLifecycleManager::new(&self.options.table);

        if self.options.truncate {
            progress.enter(RunPhase::Truncating);
            lifecycle.truncate(destination).await?;
        }

        if self.options.create_table {
            progress.enter(RunPhase::CreatingSchema);
            lifecycle.create_or_replace(destination, schema).await?;
        }

        progress.enter(RunPhase::Loading);
        let mut sanitizer = RecordSanitizer::new(schema);
        let mut bulk = BulkCopy::new(destination, &self.options.table, self.options.bulk_timeout);

        let outcome = self
            .stream(source, &mut sanitizer, &mut bulk, progress)
            .await;
        progress.copied = bulk.copied();
        progress.coercions = sanitizer.coercions();
        outcome
    }

    async fn stream<S>(
        &self,
        source: &mut S,
        sanitizer: &mut RecordSanitizer<'_>,
        bulk: &mut BulkCopy<'_>,
        progress: &mut Progress,
    ) -> Result<()>
    where
        S: RecordSource + ?Sized,
    {
        let declared = source.record_count();
        let batch_size = self.options.batch_size;
        let capacity = usize::try_from(declared).map_or(batch_size, |n| n.min(batch_size));
        let mut batch = Vec::with_capacity(capacity);

        while let Some(record) = source.next_record() {
            let record = record?;
            if progress.read >= declared {
                warn!(
                    "Source yielded more than its declared {} records; ignoring the rest",
                    declared
                );
                break;
            }
            progress.read += 1;
            batch.push(sanitizer.sanitize(record));

            if batch.len() >= batch_size {
                let rows = std::mem::replace(&mut batch, Vec::with_capacity(capacity));
                let acknowledged = bulk.write_batch(rows).await?;
                progress.copied = bulk.copied();
                debug!(
                    "Batch acknowledged {} rows ({} of {} read)",
                    acknowledged, progress.copied, progress.read
                );
            }
        }

        if !batch.is_empty() {
            let acknowledged = bulk.write_batch(batch).await?;
            progress.copied = bulk.copied();
            debug!("Final batch acknowledged {} rows", acknowledged);
        }
        Ok(())
    }
}
