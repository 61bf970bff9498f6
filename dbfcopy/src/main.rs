//! dbfcopy - bulk copy dBase tables into SQL Server
//!
//! Exit codes: 0 when every phase completed, 1 for invalid arguments or
//! configuration, 2 when the run itself failed.

mod cli;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use cli::Cli;
use dbfcopy_core::logging::{format_elapsed, init_logging};
use dbfcopy_core::{
    BulkLoader, ConnectionConfig, Connector, DbfReader, LoadResult, RecordSource, Result,
};
use tracing::{error, info};

const EXIT_INVALID_ARGUMENTS: u8 = 1;
const EXIT_RUN_FAILED: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version also arrive here, on stdout
            let code = if e.use_stderr() {
                EXIT_INVALID_ARGUMENTS
            } else {
                0
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    if let Err(e) = init_logging(cli.global.verbose, cli.global.quiet) {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_INVALID_ARGUMENTS);
    }

    let (loader, connector) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("{}", e.display_chain());
            return ExitCode::from(EXIT_INVALID_ARGUMENTS);
        }
    };

    let result = run(&cli, &loader, connector.as_ref()).await;
    report(&cli, &result);
    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_RUN_FAILED)
    }
}

/// Validates every argument before any file or server is touched.
fn prepare(cli: &Cli) -> Result<(BulkLoader, Box<dyn Connector>)> {
    // Surface encoding mistakes before prompting for a password
    cli.dbf_options()?;
    let loader = BulkLoader::new(cli.load_options())?;
    let auth = cli.auth_mode()?;
    let config = cli.connection_config(auth)?;

    log_configuration(cli, &config, &loader);
    let connector = connector(config)?;
    Ok((loader, connector))
}

fn log_configuration(cli: &Cli, config: &ConnectionConfig, loader: &BulkLoader) {
    let options = loader.options();
    info!("Source: {}", cli.dbf.display());
    info!("Destination: {} table {}", config, options.table);
    info!("Authentication: {}", config.auth.describe());
    info!("Bulk copy timeout: {}", describe_timeout(options.bulk_timeout));
    info!(
        "Batch size: {}, truncate: {}, create table: {}, skip deleted: {}",
        options.batch_size, options.truncate, options.create_table, cli.skip_deleted_records
    );
    if config.trust_server_certificate {
        info!("Server certificate will not be validated");
    }
}

fn describe_timeout(timeout: Duration) -> String {
    if timeout.is_zero() {
        "none".to_string()
    } else {
        format!("{}s", timeout.as_secs())
    }
}

#[cfg(feature = "mssql")]
fn connector(config: ConnectionConfig) -> Result<Box<dyn Connector>> {
    Ok(Box::new(dbfcopy_core::MssqlConnector::new(config)?))
}

#[cfg(not(feature = "mssql"))]
fn connector(_config: ConnectionConfig) -> Result<Box<dyn Connector>> {
    Err(dbfcopy_core::DbfCopyError::invalid_argument(
        "This build has no SQL Server support; rebuild with the 'mssql' feature",
    ))
}

/// Opens the source and runs the load; a source that cannot be opened is a
/// failed run with nothing attempted.
async fn run(cli: &Cli, loader: &BulkLoader, connector: &dyn Connector) -> LoadResult {
    let opened = cli
        .dbf_options()
        .and_then(|options| DbfReader::open(&cli.dbf, options));
    let mut reader = match opened {
        Ok(reader) => reader,
        Err(e) => {
            error!("{}", e.display_chain());
            return LoadResult::not_started(&loader.options().table, e);
        }
    };
    info!(
        "Source holds {} records in {} columns ({})",
        reader.record_count(),
        reader.columns().len(),
        reader.encoding().name()
    );

    let result = loader.run(connector, &mut reader).await;
    if reader.deleted_skipped() > 0 {
        info!("Skipped {} deleted records", reader.deleted_skipped());
    }
    result
}

fn report(cli: &Cli, result: &LoadResult) {
    if cli.json {
        match serde_json::to_string_pretty(&result.summary()) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
        return;
    }

    println!("Copied {} of {} rows", result.copied, result.attempted);
    println!("Elapsed: {}", format_elapsed(result.elapsed));
    if let Some(phase) = result.failed_phase() {
        println!("Failed while {}", phase);
    }
}
