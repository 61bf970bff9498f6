//! End-to-end load runs against an in-memory destination.
//!
//! This test suite covers:
//! - Fresh table creation with a synthesized identity column
//! - Connection failures before any phase runs
//! - Truncate-before-load
//! - Phase failures and preserved row accounting
//! - Bulk write timeouts against a stalled server

mod common;

use std::time::Duration;

use chrono::NaiveDate;
use common::{DbfBuilder, FakeServer, VecSource};
use dbfcopy_core::{
    BulkLoader, ColumnSchema, DbfCopyError, DbfOptions, DbfReader, FieldValue, LoadOptions,
    RunPhase, SourceType, SqlValue,
};

fn people_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("NAME", SourceType::String).with_length(255),
        ColumnSchema::new("BORN", SourceType::DateTime),
        ColumnSchema::new("QTY", SourceType::Int32).with_length(5),
    ]
}

fn person(name: &str, born: FieldValue, qty: i64) -> Vec<FieldValue> {
    vec![FieldValue::Text(name.to_string()), born, FieldValue::Integer(qty)]
}

fn date(year: i32, month: u32, day: u32) -> FieldValue {
    FieldValue::Date(NaiveDate::from_ymd_opt(year, month, day).unwrap())
}

fn people(count: usize) -> Vec<Vec<FieldValue>> {
    (0..count)
        .map(|i| person(&format!("person {}", i), date(1980, 1, 1 + i as u32 % 28), i as i64))
        .collect()
}

// =============================================================================
// Reference scenarios
// =============================================================================

/// Ten records, one without a date and one with an over-long name, loaded
/// into a freshly created table.
#[tokio::test]
async fn test_create_and_load_with_coercions() {
    let mut records = people(10);
    records[2][1] = FieldValue::Text(String::new());
    records[6][0] = FieldValue::Text("x".repeat(300));

    let server = FakeServer::new();
    let mut source = VecSource::new(people_columns(), records);
    let loader = BulkLoader::new(LoadOptions::new("People").with_create_table(true)).unwrap();

    let result = loader.run(&server, &mut source).await;

    assert!(result.is_success(), "run failed: {:?}", result.error());
    assert_eq!(result.attempted, 10);
    assert_eq!(result.copied, 10);
    assert_eq!(result.read, 10);
    assert_eq!(result.coercions.truncated, 1);

    let state = server.state();
    assert_eq!(state.statements.len(), 1);
    assert!(
        state.statements[0].contains("[ID] int IDENTITY(1,1) NOT NULL PRIMARY KEY, [NAME] varchar(255)"),
        "identity column should come first: {}",
        state.statements[0]
    );

    assert_eq!(state.rows.len(), 10);
    // Rows carry NAME, BORN, QTY; the identity is assigned by the server
    assert!(state.rows.iter().all(|row| row.len() == 3));
    assert_eq!(state.rows[2].values()[1], SqlValue::DateTime(None));
    match &state.rows[6].values()[0] {
        SqlValue::Text(Some(name)) => assert_eq!(name.chars().count(), 255),
        other => panic!("unexpected value {:?}", other),
    }
    assert_eq!(state.closes, 1);
}

/// An unreachable server fails the run before anything is executed.
#[tokio::test]
async fn test_connection_failure_runs_no_phase() {
    let server = FakeServer::unreachable();
    let mut source = VecSource::new(people_columns(), people(10));
    let options = LoadOptions::new("People")
        .with_truncate(true)
        .with_create_table(true);

    let result = BulkLoader::new(options)
        .unwrap()
        .run(&server, &mut source)
        .await;

    assert!(matches!(result.error(), Some(DbfCopyError::Connection { .. })));
    assert_eq!(result.failed_phase(), Some(RunPhase::Idle));
    assert_eq!(result.copied, 0);
    assert_eq!(result.read, 0);
    assert_eq!(result.attempted, 10);

    let state = server.state();
    assert!(state.statements.is_empty());
    assert_eq!(state.bulk_calls, 0);
}

/// Truncate empties a populated table before the first batch arrives.
#[tokio::test]
async fn test_truncate_before_load() {
    let server = FakeServer::with_existing_rows(500);
    let mut source = VecSource::new(people_columns(), people(3));
    let loader = BulkLoader::new(LoadOptions::new("People").with_truncate(true)).unwrap();

    let result = loader.run(&server, &mut source).await;

    assert!(result.is_success());
    let state = server.state();
    assert_eq!(state.statements, vec!["TRUNCATE TABLE [People];"]);
    assert_eq!(state.rows_at_load_start, Some(0));
    assert_eq!(state.rows.len(), 3);
}

// =============================================================================
// Failure policy
// =============================================================================

#[tokio::test]
async fn test_unmapped_type_fails_before_connecting() {
    let mut columns = people_columns();
    columns.push(ColumnSchema::new("PHOTO", SourceType::Other("General".to_string())));
    let server = FakeServer::new();
    let mut source = VecSource::new(columns, Vec::new());

    let result = BulkLoader::new(LoadOptions::new("People"))
        .unwrap()
        .run(&server, &mut source)
        .await;

    match result.error() {
        Some(DbfCopyError::UnsupportedType { column, type_name }) => {
            assert_eq!(column, "PHOTO");
            assert_eq!(type_name, "General");
        }
        other => panic!("expected UnsupportedType, got {:?}", other),
    }
    assert_eq!(server.state().connects, 0);
}

#[tokio::test]
async fn test_truncate_failure_aborts_run() {
    let server = FakeServer {
        fail_statements_containing: Some("TRUNCATE".to_string()),
        ..FakeServer::with_existing_rows(5)
    };
    let mut source = VecSource::new(people_columns(), people(4));
    let options = LoadOptions::new("People")
        .with_truncate(true)
        .with_create_table(true);

    let result = BulkLoader::new(options)
        .unwrap()
        .run(&server, &mut source)
        .await;

    assert!(matches!(result.error(), Some(DbfCopyError::Truncate { .. })));
    assert_eq!(result.failed_phase(), Some(RunPhase::Truncating));
    let state = server.state();
    assert_eq!(state.statements.len(), 1, "create must not run after a failed truncate");
    assert_eq!(state.bulk_calls, 0);
    assert_eq!(state.rows.len(), 5);
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_create_failure_aborts_run() {
    let server = FakeServer {
        fail_statements_containing: Some("CREATE TABLE".to_string()),
        ..FakeServer::new()
    };
    let mut source = VecSource::new(people_columns(), people(4));
    let loader = BulkLoader::new(LoadOptions::new("People").with_create_table(true)).unwrap();

    let result = loader.run(&server, &mut source).await;

    assert!(matches!(result.error(), Some(DbfCopyError::CreateTable { .. })));
    assert_eq!(result.failed_phase(), Some(RunPhase::CreatingSchema));
    assert_eq!(server.state().bulk_calls, 0);
    assert_eq!(result.read, 0);
}

#[tokio::test]
async fn test_mid_stream_write_failure_keeps_copied_count() {
    let server = FakeServer {
        fail_on_batch: Some(1),
        ..FakeServer::new()
    };
    let mut source = VecSource::new(people_columns(), people(10));
    let options = LoadOptions::new("People")
        .with_create_table(true)
        .with_batch_size(4);

    let result = BulkLoader::new(options)
        .unwrap()
        .run(&server, &mut source)
        .await;

    assert_eq!(result.failed_phase(), Some(RunPhase::Loading));
    assert_eq!(result.copied, 4);
    assert_eq!(result.attempted, 10);
    assert_eq!(result.error().and_then(DbfCopyError::copied_rows), Some(4));
    let state = server.state();
    assert_eq!(state.bulk_calls, 2, "no batches after the failed one");
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_source_failure_keeps_copied_count() {
    let server = FakeServer::new();
    let mut source = VecSource::failing_after(people_columns(), people(10), 6);
    let options = LoadOptions::new("People")
        .with_create_table(true)
        .with_batch_size(4);

    let result = BulkLoader::new(options)
        .unwrap()
        .run(&server, &mut source)
        .await;

    assert!(matches!(result.error(), Some(DbfCopyError::Source { .. })));
    assert_eq!(result.copied, 4);
    assert_eq!(result.read, 6);
    assert!(result.copied <= result.attempted);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_server_times_out_and_returns_result() {
    let server = FakeServer {
        stall_on_batch: Some(1),
        stall_close: true,
        ..FakeServer::new()
    };
    let mut source = VecSource::new(people_columns(), people(10));
    let options = LoadOptions::new("People")
        .with_create_table(true)
        .with_batch_size(4)
        .with_bulk_timeout(Duration::from_secs(30));

    let result = BulkLoader::new(options)
        .unwrap()
        .run(&server, &mut source)
        .await;

    assert_eq!(result.failed_phase(), Some(RunPhase::Loading));
    assert!(result.error().is_some_and(DbfCopyError::is_timeout));
    assert_eq!(result.copied, 4);
    assert_eq!(result.error().and_then(DbfCopyError::copied_rows), Some(4));
    let state = server.state();
    assert_eq!(state.bulk_calls, 2);
    assert_eq!(state.closes, 0, "the stalled session is dropped, not closed");
}

#[tokio::test(start_paused = true)]
async fn test_stalled_close_is_bounded_without_bulk_timeout() {
    let server = FakeServer {
        stall_close: true,
        ..FakeServer::new()
    };
    let mut source = VecSource::new(people_columns(), people(3));
    let options = LoadOptions::new("People")
        .with_create_table(true)
        .with_bulk_timeout(Duration::ZERO);

    let result = BulkLoader::new(options)
        .unwrap()
        .run(&server, &mut source)
        .await;

    assert!(result.is_success());
    assert_eq!(result.copied, 3);
    assert_eq!(server.state().closes, 0);
}

#[tokio::test]
async fn test_load_without_table_fails_in_loading() {
    let server = FakeServer::new();
    let mut source = VecSource::new(people_columns(), people(2));

    let result = BulkLoader::new(LoadOptions::new("Missing"))
        .unwrap()
        .run(&server, &mut source)
        .await;

    assert!(matches!(result.error(), Some(DbfCopyError::BulkWrite { copied: 0, .. })));
    assert_eq!(result.failed_phase(), Some(RunPhase::Loading));
}

#[tokio::test]
async fn test_summary_serializes_failure() {
    let server = FakeServer::unreachable();
    let mut source = VecSource::new(people_columns(), people(3));

    let result = BulkLoader::new(LoadOptions::new("People"))
        .unwrap()
        .run(&server, &mut source)
        .await;
    let json = serde_json::to_value(result.summary()).unwrap();

    assert_eq!(json["status"], "Failed");
    assert_eq!(json["failed_phase"], "Idle");
    assert_eq!(json["attempted"], 3);
    assert_eq!(json["copied"], 0);
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
}

// =============================================================================
// DBF file to destination
// =============================================================================

#[tokio::test]
async fn test_dbf_file_with_deleted_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stock.dbf");
    DbfBuilder::new()
        .field("ITEM", 'C', 10, 0)
        .field("PRICE", 'N', 8, 2)
        .field("INSTOCK", 'L', 1, 0)
        .field("ADDED", 'D', 8, 0)
        .record(&["Widget", "12.50", "T", "20240105"])
        .deleted_record(&["Old", "1.00", "F", "19991231"])
        .record(&["Gadget", "", "", ""])
        .write(&path)
        .unwrap();

    let server = FakeServer::new();
    let mut source = DbfReader::open(&path, DbfOptions::new().with_skip_deleted(true)).unwrap();
    let loader = BulkLoader::new(LoadOptions::new("Stock").with_create_table(true)).unwrap();

    let result = loader.run(&server, &mut source).await;

    assert!(result.is_success(), "run failed: {:?}", result.error());
    assert_eq!(result.attempted, 3);
    assert_eq!(result.copied, 2);

    let state = server.state();
    assert!(state.statements[0].contains("[PRICE] decimal(8,2)"));
    assert!(state.statements[0].contains("[INSTOCK] bit NOT NULL DEFAULT 0"));

    let gadget = state.rows[1].values();
    assert_eq!(gadget[0], SqlValue::Text(Some("Gadget".to_string())));
    assert_eq!(gadget[1], SqlValue::Decimal(None));
    assert_eq!(gadget[2], SqlValue::Bit(false));
    assert_eq!(gadget[3], SqlValue::DateTime(None));
}
