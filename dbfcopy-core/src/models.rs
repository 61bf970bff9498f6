//! Core data models for the load pipeline.
//!
//! Source metadata (`ColumnSchema`), the derived destination table
//! (`DestinationSchema`), the values flowing between the two
//! (`FieldValue` in, `SqlValue` out) and the per-run outcome (`LoadResult`).

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DbfCopyError;

/// Type tag reported by the source file for a column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    String,
    Memo,
    Int32,
    Int64,
    Boolean,
    DateTime,
    Decimal,
    /// A source type with no destination mapping, named as the source names it
    Other(String),
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::String => write!(f, "String"),
            SourceType::Memo => write!(f, "Memo"),
            SourceType::Int32 => write!(f, "Int32"),
            SourceType::Int64 => write!(f, "Int64"),
            SourceType::Boolean => write!(f, "Boolean"),
            SourceType::DateTime => write!(f, "DateTime"),
            SourceType::Decimal => write!(f, "Decimal"),
            SourceType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Source column metadata. Order within a table is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub source_type: SourceType,
    /// Declared length (characters for text, total digits for numerics)
    pub length: u32,
    /// Digits after the decimal point, for decimal columns
    pub decimal_count: u8,
}

impl ColumnSchema {
    /// Creates a column with no declared length.
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
            length: 0,
            decimal_count: 0,
        }
    }

    /// Builder method to set the declared length.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Builder method to set the decimal count.
    pub fn with_decimal_count(mut self, decimal_count: u8) -> Self {
        self.decimal_count = decimal_count;
        self
    }
}

/// Longest `varchar(n)` SQL Server accepts; longer columns use `varchar(max)`
pub const MAX_VARCHAR_LENGTH: u32 = 8000;

/// SQL Server column type produced by the schema mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationType {
    /// `varchar(n)`, or `varchar(max)` when `max_length` is `None` or
    /// above `MAX_VARCHAR_LENGTH`; the sanitizer still cuts at `max_length`
    VarChar { max_length: Option<u32> },
    /// `int`
    Int,
    /// `bigint`
    BigInt,
    /// `bit`
    Bit,
    /// `datetime`
    DateTime,
    /// `decimal(precision, scale)`
    Decimal { precision: u8, scale: u8 },
}

impl DestinationType {
    /// Renders the SQL type name.
    pub fn to_sql(&self) -> String {
        match self {
            DestinationType::VarChar {
                max_length: Some(length),
            } if *length <= MAX_VARCHAR_LENGTH => format!("varchar({})", length),
            DestinationType::VarChar { .. } => "varchar(max)".to_string(),
            DestinationType::Int => "int".to_string(),
            DestinationType::BigInt => "bigint".to_string(),
            DestinationType::Bit => "bit".to_string(),
            DestinationType::DateTime => "datetime".to_string(),
            DestinationType::Decimal { precision, scale } => {
                format!("decimal({},{})", precision, scale)
            }
        }
    }
}

impl std::fmt::Display for DestinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Column default emitted in the DDL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnDefault {
    /// `DEFAULT 0` on numeric columns
    Zero,
    /// `DEFAULT 0` on bit columns
    False,
}

/// Where a destination column's values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnOrigin {
    /// Identity column added by the mapper; values are assigned by the database
    Synthesized,
    /// Source column at this ordinal
    Source(usize),
}

/// A column of the destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationColumn {
    pub name: String,
    pub data_type: DestinationType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub origin: ColumnOrigin,
}

impl DestinationColumn {
    /// Whether the database assigns this column's values.
    pub fn is_db_assigned(&self) -> bool {
        self.origin == ColumnOrigin::Synthesized
    }
}

/// The destination table derived from a source column sequence.
///
/// Exactly one identity column exists: either synthesized and placed first,
/// or the source column named `ID` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSchema {
    pub columns: Vec<DestinationColumn>,
    /// Index into `columns` of the identity column
    pub identity_index: usize,
}

impl DestinationSchema {
    /// The identity column, synthesized or source-provided.
    pub fn identity_column(&self) -> Option<&DestinationColumn> {
        self.columns.get(self.identity_index)
    }

    /// Whether the identity column was synthesized by the mapper.
    pub fn has_synthesized_identity(&self) -> bool {
        self.identity_column()
            .is_some_and(DestinationColumn::is_db_assigned)
    }

    /// Columns that receive values from the source, in destination order.
    pub fn writable_columns(&self) -> impl Iterator<Item = &DestinationColumn> {
        self.columns.iter().filter(|column| !column.is_db_assigned())
    }

    /// Width of a sanitized row: all columns minus a database-assigned identity.
    pub fn row_width(&self) -> usize {
        self.writable_columns().count()
    }
}

/// A raw value as decoded from the source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    /// True for `Null` and for text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Integer(value) => write!(f, "{}", value),
            FieldValue::Decimal(value) => write!(f, "{}", value),
            FieldValue::Boolean(value) => write!(f, "{}", value),
            FieldValue::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            FieldValue::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// A value ready for the destination, typed after its column.
///
/// Nulls keep their column type so the bulk writer can encode them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlValue {
    Text(Option<String>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Bit(bool),
    Decimal(Option<Decimal>),
    DateTime(Option<NaiveDateTime>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Text(value) => value.is_none(),
            SqlValue::Int(value) => value.is_none(),
            SqlValue::BigInt(value) => value.is_none(),
            SqlValue::Bit(_) => false,
            SqlValue::Decimal(value) => value.is_none(),
            SqlValue::DateTime(value) => value.is_none(),
        }
    }
}

/// One sanitized row, aligned with `DestinationSchema::writable_columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedRow {
    values: Vec<SqlValue>,
}

impl SanitizedRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// Phases of a load run.
///
/// `Idle → Connected → [Truncating] → [CreatingSchema] → Loading →
/// Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Connected,
    Truncating,
    CreatingSchema,
    Loading,
    Completed,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Connected => write!(f, "connected"),
            RunPhase::Truncating => write!(f, "truncating"),
            RunPhase::CreatingSchema => write!(f, "creating schema"),
            RunPhase::Loading => write!(f, "loading"),
            RunPhase::Completed => write!(f, "completed"),
            RunPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Lossy coercions applied by the sanitizer during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoercionCounts {
    /// Text values cut to their column length
    pub truncated: u64,
    /// Non-empty values replaced by NULL because they did not parse or fit
    pub nulled: u64,
    /// Timestamps raised to the minimum representable value
    pub clamped: u64,
}

impl CoercionCounts {
    pub fn total(&self) -> u64 {
        self.truncated + self.nulled + self.clamped
    }
}

/// Terminal status of a run
#[derive(Debug)]
pub enum LoadStatus {
    Completed,
    Failed {
        /// Phase in which the failure happened
        phase: RunPhase,
        error: DbfCopyError,
    },
}

/// Final accounting of a run, produced on success and on failure.
///
/// `copied <= attempted` always holds for a well-behaved destination.
#[derive(Debug)]
pub struct LoadResult {
    pub table: String,
    /// Record count declared by the source
    pub attempted: u64,
    /// Rows acknowledged by the bulk writer
    pub copied: u64,
    /// Rows read from the source and sanitized
    pub read: u64,
    pub elapsed: Duration,
    pub coercions: CoercionCounts,
    pub status: LoadStatus,
}

impl LoadResult {
    /// A run that failed before any record was read, such as when the
    /// source could not be opened.
    pub fn not_started(table: impl Into<String>, error: DbfCopyError) -> Self {
        Self {
            table: table.into(),
            attempted: 0,
            copied: 0,
            read: 0,
            elapsed: Duration::ZERO,
            coercions: CoercionCounts::default(),
            status: LoadStatus::Failed {
                phase: RunPhase::Idle,
                error,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, LoadStatus::Completed)
    }

    pub fn error(&self) -> Option<&DbfCopyError> {
        match &self.status {
            LoadStatus::Completed => None,
            LoadStatus::Failed { error, .. } => Some(error),
        }
    }

    pub fn failed_phase(&self) -> Option<RunPhase> {
        match &self.status {
            LoadStatus::Completed => None,
            LoadStatus::Failed { phase, .. } => Some(*phase),
        }
    }

    /// Serializable view of the result for machine-readable output.
    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            table: self.table.clone(),
            status: if self.is_success() {
                RunPhase::Completed
            } else {
                RunPhase::Failed
            },
            failed_phase: self.failed_phase(),
            error: self.error().map(DbfCopyError::display_chain),
            attempted: self.attempted,
            copied: self.copied,
            read: self.read,
            elapsed_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            coercions: self.coercions,
        }
    }
}

/// Serializable summary of a `LoadResult`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub table: String,
    pub status: RunPhase,
    pub failed_phase: Option<RunPhase>,
    pub error: Option<String>,
    pub attempted: u64,
    pub copied: u64,
    pub read: u64,
    pub elapsed_ms: u64,
    pub coercions: CoercionCounts,
}
