//! dBase reader tests against files on disk.

mod common;

use chrono::NaiveDate;
use common::{DbfBuilder, write_dbt};
use dbfcopy_core::{ColumnSchema, DbfOptions, DbfReader, FieldValue, RecordSource, SourceType};
use rust_decimal::Decimal;

#[test]
fn test_open_reads_columns_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders.dbf");
    DbfBuilder::new()
        .field("ORDERNO", 'N', 12, 0)
        .field("CUSTOMER", 'C', 20, 0)
        .field("TOTAL", 'N', 10, 2)
        .field("SHIPPED", 'D', 8, 0)
        .record(&["100000000001", "ACME Corp", "1234.56", "20230630"])
        .record(&["2", "Globex", "-7.50", ""])
        .write(&path)
        .unwrap();

    let reader = DbfReader::open(&path, DbfOptions::new()).unwrap();
    assert_eq!(
        reader.columns(),
        &[
            ColumnSchema::new("ORDERNO", SourceType::Int64).with_length(12),
            ColumnSchema::new("CUSTOMER", SourceType::String).with_length(20),
            ColumnSchema::new("TOTAL", SourceType::Decimal)
                .with_length(10)
                .with_decimal_count(2),
            ColumnSchema::new("SHIPPED", SourceType::DateTime).with_length(8),
        ]
    );
    assert_eq!(reader.record_count(), 2);

    let records: Vec<_> = reader.map(Result::unwrap).collect();
    assert_eq!(
        records[0],
        vec![
            FieldValue::Integer(100_000_000_001),
            FieldValue::Text("ACME Corp".to_string()),
            FieldValue::Decimal(Decimal::new(123_456, 2)),
            FieldValue::Date(NaiveDate::from_ymd_opt(2023, 6, 30).unwrap()),
        ]
    );
    assert_eq!(records[1][2], FieldValue::Decimal(Decimal::new(-750, 2)));
    assert_eq!(records[1][3], FieldValue::Null);
}

#[test]
fn test_memo_file_next_to_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.dbf");
    DbfBuilder::new()
        .version(0x83)
        .field("TITLE", 'C', 8, 0)
        .field("BODY", 'M', 10, 0)
        .record(&["first", "1"])
        .record(&["second", "2"])
        .record(&["empty", ""])
        .write(&path)
        .unwrap();
    write_dbt(&dir.path().join("notes.dbt"), &["Memo one", "Memo two\r\nwith a second line"]).unwrap();

    let reader = DbfReader::open(&path, DbfOptions::new()).unwrap();
    assert_eq!(reader.columns()[1].source_type, SourceType::Memo);

    let bodies: Vec<_> = reader.map(|record| record.unwrap()[1].clone()).collect();
    assert_eq!(
        bodies,
        vec![
            FieldValue::Text("Memo one".to_string()),
            FieldValue::Text("Memo two\r\nwith a second line".to_string()),
            FieldValue::Null,
        ]
    );
}

#[test]
fn test_missing_memo_file_yields_nulls() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orphan.dbf");
    DbfBuilder::new()
        .version(0x83)
        .field("BODY", 'M', 10, 0)
        .record(&["1"])
        .write(&path)
        .unwrap();

    let records: Vec<_> = DbfReader::open(&path, DbfOptions::new())
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(records, vec![vec![FieldValue::Null]]);
}

#[test]
fn test_encoding_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cyrillic.dbf");
    let mut bytes = DbfBuilder::new()
        .field("CITY", 'C', 6, 0)
        .record(&["xxxxxx"])
        .bytes();
    // "Москва" in cp866, written over the placeholder
    let city = [0x8C, 0xAE, 0xE1, 0xAA, 0xA2, 0xA0];
    let start = bytes.len() - 1 - city.len();
    bytes[start..start + city.len()].copy_from_slice(&city);
    std::fs::write(&path, bytes).unwrap();

    let options = DbfOptions::new().with_encoding_label("cp866").unwrap();
    let mut reader = DbfReader::open(&path, options).unwrap();
    assert_eq!(
        reader.next_record().unwrap().unwrap(),
        vec![FieldValue::Text("Москва".to_string())]
    );
}

#[test]
fn test_not_a_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("readme.dbf");
    std::fs::write(&path, b"This is plainly not a dBase table, just text.").unwrap();

    assert!(DbfReader::open(&path, DbfOptions::new()).is_err());
}
