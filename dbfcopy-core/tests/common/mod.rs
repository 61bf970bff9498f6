//! Shared fixtures for integration tests: an in-memory SQL Server stand-in,
//! an in-memory record source and a DBF file builder.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dbfcopy_core::error::Message;
use dbfcopy_core::{
    ColumnSchema, Connector, DbfCopyError, Destination, FieldValue, RecordSource, Result,
    SanitizedRow,
};

// =============================================================================
// Fake destination
// =============================================================================

/// Observable state of the fake server, shared by all its connections.
#[derive(Debug, Default)]
pub struct ServerState {
    pub statements: Vec<String>,
    pub table_exists: bool,
    pub rows: Vec<SanitizedRow>,
    /// Row count seen by the first bulk write of the session
    pub rows_at_load_start: Option<usize>,
    pub connects: usize,
    pub closes: usize,
    pub bulk_calls: usize,
}

#[derive(Debug, Default)]
pub struct FakeServer {
    pub shared: Arc<Mutex<ServerState>>,
    pub fail_connect: bool,
    /// Zero-based bulk call that fails
    pub fail_on_batch: Option<usize>,
    /// Statements containing this text fail
    pub fail_statements_containing: Option<String>,
    /// Zero-based bulk call that never completes
    pub stall_on_batch: Option<usize>,
    /// Closing a session never completes
    pub stall_close: bool,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server whose destination table already holds `count` rows.
    pub fn with_existing_rows(count: usize) -> Self {
        let server = Self::new();
        {
            let mut state = server.state();
            state.table_exists = true;
            state.rows = (0..count).map(|_| SanitizedRow::new(Vec::new())).collect();
        }
        server
    }

    pub fn unreachable() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.shared.lock().unwrap()
    }
}

#[async_trait]
impl Connector for FakeServer {
    async fn connect(&self) -> Result<Box<dyn Destination>> {
        if self.fail_connect {
            return Err(DbfCopyError::connection_failed(
                "Failed to reach server (fake)",
                Message("connection refused".to_string()),
            ));
        }
        self.state().connects += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.shared),
            fail_on_batch: self.fail_on_batch,
            fail_statements_containing: self.fail_statements_containing.clone(),
            stall_on_batch: self.stall_on_batch,
            stall_close: self.stall_close,
        }))
    }

    fn describe(&self) -> String {
        "fake server".to_string()
    }
}

struct FakeSession {
    state: Arc<Mutex<ServerState>>,
    fail_on_batch: Option<usize>,
    fail_statements_containing: Option<String>,
    stall_on_batch: Option<usize>,
    stall_close: bool,
}

#[async_trait]
impl Destination for FakeSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());

        if let Some(pattern) = &self.fail_statements_containing {
            if sql.contains(pattern.as_str()) {
                return Err(DbfCopyError::query_failed(
                    "Statement failed",
                    Message("permission denied".to_string()),
                ));
            }
        }

        if sql.starts_with("TRUNCATE TABLE") {
            if !state.table_exists {
                return Err(DbfCopyError::query_failed(
                    "Statement failed",
                    Message("Invalid object name".to_string()),
                ));
            }
            state.rows.clear();
        } else if sql.contains("CREATE TABLE") {
            state.table_exists = true;
            state.rows.clear();
        }
        Ok(0)
    }

    async fn bulk_write(&mut self, table: &str, rows: Vec<SanitizedRow>) -> Result<u64> {
        let call = {
            let mut state = self.state.lock().unwrap();
            state.bulk_calls += 1;
            state.bulk_calls - 1
        };
        if self.stall_on_batch == Some(call) {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();

        if !state.table_exists || self.fail_on_batch == Some(call) {
            return Err(DbfCopyError::BulkWrite {
                table: table.to_string(),
                copied: 0,
                source: Box::new(Message("bulk load rejected".to_string())),
            });
        }

        if state.rows_at_load_start.is_none() {
            state.rows_at_load_start = Some(state.rows.len());
        }
        let count = rows.len() as u64;
        state.rows.extend(rows);
        Ok(count)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

// =============================================================================
// In-memory source
// =============================================================================

/// Record source over prepared values.
pub struct VecSource {
    columns: Vec<ColumnSchema>,
    records: std::vec::IntoIter<Result<Vec<FieldValue>>>,
    declared: u64,
}

impl VecSource {
    pub fn new(columns: Vec<ColumnSchema>, records: Vec<Vec<FieldValue>>) -> Self {
        let declared = records.len() as u64;
        Self {
            columns,
            records: records.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
            declared,
        }
    }

    /// A source whose read fails after `good` records.
    pub fn failing_after(columns: Vec<ColumnSchema>, records: Vec<Vec<FieldValue>>, good: usize) -> Self {
        let declared = records.len() as u64;
        let mut items: Vec<Result<Vec<FieldValue>>> =
            records.into_iter().take(good).map(Ok).collect();
        items.push(Err(DbfCopyError::malformed_source(
            "table data",
            "record is truncated",
        )));
        Self {
            columns,
            records: items.into_iter(),
            declared,
        }
    }
}

impl RecordSource for VecSource {
    fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    fn record_count(&self) -> u64 {
        self.declared
    }

    fn next_record(&mut self) -> Option<Result<Vec<FieldValue>>> {
        self.records.next()
    }
}

// =============================================================================
// DBF files
// =============================================================================

struct FieldSpec {
    name: String,
    tag: u8,
    length: u8,
    decimals: u8,
}

/// Writes small dBase III tables.
pub struct DbfBuilder {
    version: u8,
    language_driver: u8,
    fields: Vec<FieldSpec>,
    records: Vec<Vec<u8>>,
}

impl Default for DbfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DbfBuilder {
    pub fn new() -> Self {
        Self {
            version: 0x03,
            language_driver: 0x03,
            fields: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Sets the version byte (0x83 marks a dBase III table with memo).
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn language_driver(mut self, id: u8) -> Self {
        self.language_driver = id;
        self
    }

    pub fn field(mut self, name: &str, tag: char, length: u8, decimals: u8) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            tag: tag as u8,
            length,
            decimals,
        });
        self
    }

    /// Adds a live record; values are padded to their field width.
    pub fn record(self, values: &[&str]) -> Self {
        self.push_record(false, values)
    }

    pub fn deleted_record(self, values: &[&str]) -> Self {
        self.push_record(true, values)
    }

    fn push_record(mut self, deleted: bool, values: &[&str]) -> Self {
        assert_eq!(values.len(), self.fields.len(), "one value per field");
        let mut record = vec![if deleted { b'*' } else { b' ' }];
        for (field, value) in self.fields.iter().zip(values) {
            let width = usize::from(field.length);
            assert!(value.len() <= width, "value '{}' wider than field", value);
            let padded = if matches!(field.tag, b'N' | b'F') {
                format!("{:>width$}", value, width = width)
            } else {
                format!("{:<width$}", value, width = width)
            };
            record.extend_from_slice(padded.as_bytes());
        }
        self.records.push(record);
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        let header_length = 32 + 32 * self.fields.len() + 1;
        let record_length = 1 + self
            .fields
            .iter()
            .map(|f| usize::from(f.length))
            .sum::<usize>();

        let mut bytes = vec![0u8; 32];
        bytes[0] = self.version;
        bytes[1] = 125;
        bytes[2] = 6;
        bytes[3] = 1;
        bytes[4..8].copy_from_slice(&(self.records.len() as u32).to_le_bytes());
        bytes[8..10].copy_from_slice(&(header_length as u16).to_le_bytes());
        bytes[10..12].copy_from_slice(&(record_length as u16).to_le_bytes());
        bytes[29] = self.language_driver;

        for field in &self.fields {
            let mut descriptor = [0u8; 32];
            descriptor[..field.name.len()].copy_from_slice(field.name.as_bytes());
            descriptor[11] = field.tag;
            descriptor[16] = field.length;
            descriptor[17] = field.decimals;
            bytes.extend_from_slice(&descriptor);
        }
        bytes.push(0x0D);

        for record in &self.records {
            bytes.extend_from_slice(record);
        }
        bytes.push(0x1A);
        bytes
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.bytes())
    }
}

/// Writes a dBase III memo file holding `entries` in blocks 1, 2, ...
pub fn write_dbt(path: &Path, entries: &[&str]) -> std::io::Result<()> {
    let mut bytes = vec![0u8; 512];
    bytes[0..4].copy_from_slice(&(entries.len() as u32 + 1).to_le_bytes());
    for entry in entries {
        let mut block = entry.as_bytes().to_vec();
        block.extend_from_slice(&[0x1A, 0x1A]);
        assert!(block.len() <= 512, "memo entries must fit one block");
        block.resize(512, 0);
        bytes.extend_from_slice(&block);
    }
    std::fs::write(path, bytes)
}
