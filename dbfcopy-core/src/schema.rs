//! Source column metadata to SQL Server schema and DDL.
//!
//! # Type Mapping
//!
//! | Source            | Destination                     |
//! |-------------------|---------------------------------|
//! | String, length>0  | `varchar(length)`               |
//! | String, length=0  | `varchar(max)`                  |
//! | Memo              | `varchar(max)`                  |
//! | Int32             | `int DEFAULT 0`                 |
//! | Int64             | `bigint DEFAULT 0`              |
//! | Boolean           | `bit NOT NULL DEFAULT 0`        |
//! | DateTime          | `datetime`                      |
//! | Decimal           | `decimal(length,decimal_count)` |
//!
//! Any other source type is rejected with `UnsupportedType`.
//!
//! When no source column is named `ID` (case-insensitive) an
//! `int IDENTITY(1,1)` primary key named `ID` is prepended.

use std::collections::HashSet;

use crate::Result;
use crate::error::DbfCopyError;
use crate::models::{
    ColumnDefault, ColumnOrigin, ColumnSchema, DestinationColumn, DestinationSchema,
    DestinationType, SourceType,
};

/// Name of the identity column, matched case-insensitively against the source.
pub const IDENTITY_COLUMN: &str = "ID";

/// Largest precision SQL Server accepts for `decimal`.
const MAX_DECIMAL_PRECISION: u8 = 38;

/// Maps one source column to its destination type, nullability and default.
///
/// # Errors
/// Returns `UnsupportedType` naming the source type when it has no mapping.
pub fn map_source_type(
    column: &ColumnSchema,
) -> Result<(DestinationType, bool, Option<ColumnDefault>)> {
    let mapped = match &column.source_type {
        SourceType::String if column.length > 0 => (
            DestinationType::VarChar {
                max_length: Some(column.length),
            },
            true,
            None,
        ),
        SourceType::String | SourceType::Memo => {
            (DestinationType::VarChar { max_length: None }, true, None)
        }
        SourceType::Int32 => (DestinationType::Int, true, Some(ColumnDefault::Zero)),
        SourceType::Int64 => (DestinationType::BigInt, true, Some(ColumnDefault::Zero)),
        SourceType::Boolean => (DestinationType::Bit, false, Some(ColumnDefault::False)),
        SourceType::DateTime => (DestinationType::DateTime, true, None),
        SourceType::Decimal => {
            let precision = u8::try_from(column.length)
                .unwrap_or(MAX_DECIMAL_PRECISION)
                .clamp(1, MAX_DECIMAL_PRECISION);
            let scale = column.decimal_count.min(precision);
            (DestinationType::Decimal { precision, scale }, true, None)
        }
        SourceType::Other(type_name) => {
            return Err(DbfCopyError::unsupported_type(&column.name, type_name));
        }
    };
    Ok(mapped)
}

/// Derives the destination schema from an ordered source column sequence.
///
/// Source order is preserved; a synthesized identity column, when needed,
/// comes first.
///
/// # Errors
/// Returns `UnsupportedType` for unmapped source types and a `Source` error
/// when two columns share a name (SQL Server names are case-insensitive).
pub fn derive_schema(columns: &[ColumnSchema]) -> Result<DestinationSchema> {
    let mut seen = HashSet::with_capacity(columns.len());
    for column in columns {
        if !seen.insert(column.name.to_uppercase()) {
            return Err(DbfCopyError::malformed_source(
                "column schema",
                format!("duplicate column name '{}'", column.name),
            ));
        }
    }

    let source_identity = columns
        .iter()
        .position(|column| column.name.eq_ignore_ascii_case(IDENTITY_COLUMN));

    let mut destination = Vec::with_capacity(columns.len() + 1);
    if source_identity.is_none() {
        destination.push(DestinationColumn {
            name: IDENTITY_COLUMN.to_string(),
            data_type: DestinationType::Int,
            nullable: false,
            default: None,
            origin: ColumnOrigin::Synthesized,
        });
    }

    for (ordinal, column) in columns.iter().enumerate() {
        let (data_type, nullable, default) = map_source_type(column)?;
        destination.push(DestinationColumn {
            name: column.name.clone(),
            data_type,
            nullable,
            default,
            origin: ColumnOrigin::Source(ordinal),
        });
    }

    Ok(DestinationSchema {
        columns: destination,
        identity_index: source_identity.unwrap_or(0),
    })
}

/// Renders one column definition for `CREATE TABLE`.
pub fn column_definition(column: &DestinationColumn) -> String {
    let mut definition = format!(
        "{} {}",
        quote_identifier(&column.name),
        column.data_type.to_sql()
    );
    if column.is_db_assigned() {
        definition.push_str(" IDENTITY(1,1) NOT NULL PRIMARY KEY");
        return definition;
    }
    if !column.nullable {
        definition.push_str(" NOT NULL");
    }
    if let Some(ColumnDefault::Zero | ColumnDefault::False) = column.default {
        definition.push_str(" DEFAULT 0");
    }
    definition
}

/// Builds `CREATE TABLE` for the schema.
pub fn create_table_ddl(table: &str, schema: &DestinationSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(column_definition)
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_table_name(table), columns)
}

/// Builds a drop-if-exists followed by `CREATE TABLE`.
pub fn create_or_replace_ddl(table: &str, schema: &DestinationSchema) -> String {
    format!(
        "{} {};",
        drop_table_if_exists_sql(table),
        create_table_ddl(table, schema)
    )
}

/// Builds the statement that drops the table when it exists.
pub fn drop_table_if_exists_sql(table: &str) -> String {
    let quoted = quote_table_name(table);
    format!(
        "IF OBJECT_ID(N'{}', N'U') IS NOT NULL DROP TABLE {};",
        quoted.replace('\'', "''"),
        quoted
    )
}

/// Builds `TRUNCATE TABLE`.
pub fn truncate_table_sql(table: &str) -> String {
    format!("TRUNCATE TABLE {};", quote_table_name(table))
}

/// Brackets a single identifier, escaping `]`.
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Brackets every part of a possibly qualified table name.
///
/// Parts that are already bracketed are kept as written, so
/// `dbo.Orders` and `[dbo].[Orders]` render identically.
pub fn quote_table_name(table: &str) -> String {
    split_qualified_name(table)
        .iter()
        .map(|part| quote_identifier(part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Splits `server.db.schema.table` style names, honouring brackets.
fn split_qualified_name(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = name.trim().chars().peekable();
    let mut in_brackets = false;

    while let Some(c) = chars.next() {
        match c {
            '[' if !in_brackets && current.is_empty() => in_brackets = true,
            ']' if in_brackets => {
                if chars.peek() == Some(&']') {
                    chars.next();
                    current.push(']');
                } else {
                    in_brackets = false;
                }
            }
            '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}
