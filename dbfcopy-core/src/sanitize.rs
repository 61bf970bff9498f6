//! Row-by-row coercion of source values into destination column types.
//!
//! Coercion is lossy but never fatal: values that cannot be represented are
//! truncated, clamped or replaced by NULL, and counted in `CoercionCounts`.
//!
//! - text longer than the column is cut to the column length and its
//!   trailing whitespace trimmed
//! - empty numeric values become NULL, never zero
//! - empty booleans become `false`, matching the column default
//! - unparseable timestamps become NULL; timestamps before
//!   1753-01-01 12:00:00 are raised to that value

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use tracing::{debug, trace};

use crate::models::{
    CoercionCounts, ColumnOrigin, DestinationColumn, DestinationSchema, DestinationType,
    FieldValue, SanitizedRow, SqlValue,
};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y%m%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y"];

/// Earliest instant the destination `datetime` type stores; earlier values are clamped to it.
pub fn min_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1753, 1, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Parses the date/time spellings found in exported tables.
///
/// Returns `None` when no known format matches.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Some(parsed.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Outcome of coercing a single value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coercion {
    None,
    Truncated,
    Nulled,
    Clamped,
}

/// Coerces raw source records into rows matching a destination schema.
///
/// Holds no rows: each call consumes one record and returns one row.
#[derive(Debug)]
pub struct RecordSanitizer<'a> {
    schema: &'a DestinationSchema,
    floor: NaiveDateTime,
    counts: CoercionCounts,
}

impl<'a> RecordSanitizer<'a> {
    pub fn new(schema: &'a DestinationSchema) -> Self {
        Self {
            schema,
            floor: min_datetime(),
            counts: CoercionCounts::default(),
        }
    }

    /// Coercions applied so far.
    pub fn coercions(&self) -> CoercionCounts {
        self.counts
    }

    /// Sanitizes one record given in source column order.
    ///
    /// Values missing from a short record are treated as empty.
    pub fn sanitize(&mut self, mut record: Vec<FieldValue>) -> SanitizedRow {
        let mut values = Vec::with_capacity(self.schema.row_width());
        for column in self.schema.writable_columns() {
            let ColumnOrigin::Source(ordinal) = column.origin else {
                continue;
            };
            let raw = record
                .get_mut(ordinal)
                .map_or(FieldValue::Null, |slot| std::mem::replace(slot, FieldValue::Null));
            let (value, coercion) = self.sanitize_value(column, raw);
            self.record(column, coercion);
            values.push(value);
        }
        trace!("Sanitized row with {} values", values.len());
        SanitizedRow::new(values)
    }

    fn record(&mut self, column: &DestinationColumn, coercion: Coercion) {
        match coercion {
            Coercion::None => {}
            Coercion::Truncated => {
                self.counts.truncated += 1;
                debug!("Truncated value in column '{}'", column.name);
            }
            Coercion::Nulled => {
                self.counts.nulled += 1;
                debug!(
                    "Replaced unrepresentable value in column '{}' with NULL",
                    column.name
                );
            }
            Coercion::Clamped => {
                self.counts.clamped += 1;
                debug!("Clamped timestamp in column '{}'", column.name);
            }
        }
    }

    fn sanitize_value(&self, column: &DestinationColumn, raw: FieldValue) -> (SqlValue, Coercion) {
        match column.data_type {
            DestinationType::VarChar { max_length } => {
                let (text, coercion) = sanitize_text(raw, max_length);
                (SqlValue::Text(text), coercion)
            }
            DestinationType::Int => {
                let (value, coercion) = sanitize_integer(raw);
                match value.map(i32::try_from) {
                    Some(Ok(v)) => (SqlValue::Int(Some(v)), coercion),
                    Some(Err(_)) => (SqlValue::Int(None), Coercion::Nulled),
                    None => (SqlValue::Int(None), coercion),
                }
            }
            DestinationType::BigInt => {
                let (value, coercion) = sanitize_integer(raw);
                (SqlValue::BigInt(value), coercion)
            }
            DestinationType::Bit => (SqlValue::Bit(sanitize_boolean(&raw)), Coercion::None),
            DestinationType::Decimal { precision, scale } => {
                let (value, coercion) = sanitize_decimal(raw, precision, scale);
                (SqlValue::Decimal(value), coercion)
            }
            DestinationType::DateTime => {
                let (value, coercion) = sanitize_datetime(raw, self.floor);
                (SqlValue::DateTime(value), coercion)
            }
        }
    }
}

/// Cuts text to `max_length` characters, trimming trailing whitespace of the cut.
fn sanitize_text(raw: FieldValue, max_length: Option<u32>) -> (Option<String>, Coercion) {
    let text = match raw {
        FieldValue::Null => return (None, Coercion::None),
        FieldValue::Text(text) => text,
        other => other.to_string(),
    };
    let Some(limit) = max_length.and_then(|l| usize::try_from(l).ok()) else {
        return (Some(text), Coercion::None);
    };
    match text.char_indices().nth(limit) {
        Some((cut, _)) => {
            let truncated = text[..cut].trim_end().to_string();
            (Some(truncated), Coercion::Truncated)
        }
        None => (Some(text), Coercion::None),
    }
}

fn sanitize_integer(raw: FieldValue) -> (Option<i64>, Coercion) {
    if raw.is_blank() {
        return (None, Coercion::None);
    }
    let parsed = match raw {
        FieldValue::Integer(value) => Some(value),
        FieldValue::Decimal(value) => integral_decimal(value),
        FieldValue::Boolean(value) => Some(i64::from(value)),
        FieldValue::Text(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| Decimal::from_str(text).ok().and_then(integral_decimal))
        }
        FieldValue::Null | FieldValue::Date(_) | FieldValue::DateTime(_) => None,
    };
    match parsed {
        Some(value) => (Some(value), Coercion::None),
        None => (None, Coercion::Nulled),
    }
}

fn integral_decimal(value: Decimal) -> Option<i64> {
    if value.fract().is_zero() {
        value.to_i64()
    } else {
        None
    }
}

fn sanitize_boolean(raw: &FieldValue) -> bool {
    match raw {
        FieldValue::Boolean(value) => *value,
        FieldValue::Integer(value) => *value != 0,
        FieldValue::Decimal(value) => !value.is_zero(),
        FieldValue::Text(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "t" | "true" | "y" | "yes" | "1"
        ),
        FieldValue::Null | FieldValue::Date(_) | FieldValue::DateTime(_) => false,
    }
}

/// Rounds to the column scale; values with too many integer digits become NULL.
fn sanitize_decimal(raw: FieldValue, precision: u8, scale: u8) -> (Option<Decimal>, Coercion) {
    if raw.is_blank() {
        return (None, Coercion::None);
    }
    let parsed = match raw {
        FieldValue::Decimal(value) => Some(value),
        FieldValue::Integer(value) => Some(Decimal::from(value)),
        FieldValue::Text(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    };
    let Some(mut value) = parsed else {
        return (None, Coercion::Nulled);
    };

    value = value.round_dp_with_strategy(u32::from(scale), RoundingStrategy::MidpointAwayFromZero);
    value.rescale(u32::from(scale));

    let integer_digits = precision.saturating_sub(scale);
    if integer_digits <= 28 {
        let limit = Decimal::from_i128_with_scale(10_i128.pow(u32::from(integer_digits)), 0);
        if value.abs() >= limit {
            return (None, Coercion::Nulled);
        }
    }
    (Some(value), Coercion::None)
}

fn sanitize_datetime(raw: FieldValue, floor: NaiveDateTime) -> (Option<NaiveDateTime>, Coercion) {
    if raw.is_blank() {
        return (None, Coercion::None);
    }
    let parsed = match raw {
        FieldValue::DateTime(value) => Some(value),
        FieldValue::Date(value) => Some(value.and_time(NaiveTime::MIN)),
        FieldValue::Text(text) => parse_datetime(&text),
        _ => None,
    };
    match parsed {
        Some(value) if value < floor => (Some(floor), Coercion::Clamped),
        Some(value) => (Some(value), Coercion::None),
        None => (None, Coercion::Nulled),
    }
}
