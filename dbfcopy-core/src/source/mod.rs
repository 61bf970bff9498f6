//! Record sources feeding the load pipeline.
//!
//! # Module Structure
//! - `dbf`: dBase / FoxPro table reader
//! - `memo`: `.dbt` / `.fpt` memo file access

pub mod dbf;
pub mod memo;

pub use dbf::{DbfHeader, DbfOptions, DbfReader, encoding_for_language_driver};
pub use memo::{MemoFile, MemoFormat};

use crate::Result;
use crate::models::{ColumnSchema, FieldValue};

/// A forward-only stream of records with known column metadata.
///
/// Values are yielded in column order. Sources are read once per run.
pub trait RecordSource {
    /// Ordered column metadata
    fn columns(&self) -> &[ColumnSchema];

    /// Number of records the source declares, deleted ones included
    fn record_count(&self) -> u64;

    /// Reads the next record, or `None` once the source is exhausted.
    fn next_record(&mut self) -> Option<Result<Vec<FieldValue>>>;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn columns(&self) -> &[ColumnSchema] {
        (**self).columns()
    }

    fn record_count(&self) -> u64 {
        (**self).record_count()
    }

    fn next_record(&mut self) -> Option<Result<Vec<FieldValue>>> {
        (**self).next_record()
    }
}
