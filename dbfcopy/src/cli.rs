//! Command-line interface definition.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use dbfcopy_core::destination::{AuthMode, ConnectionConfig};
use dbfcopy_core::load::{DEFAULT_BATCH_SIZE, LoadOptions};
use dbfcopy_core::security::Credentials;
use dbfcopy_core::source::DbfOptions;
use dbfcopy_core::{DbfCopyError, Result};

#[derive(Debug, Parser)]
#[command(name = "dbfcopy")]
#[command(about = "Bulk copy a dBase (.dbf) table into SQL Server")]
#[command(version)]
#[command(long_about = "
dbfcopy - Bulk copy dBase tables into SQL Server

Reads a .dbf table (with its .dbt/.fpt memo file when present), maps its
columns to SQL Server types, and bulk-loads every record into a table.
Values that do not fit are coerced rather than rejected: long text is cut
to the column length, unparseable numbers and dates become NULL, and dates
before 1753-01-01 12:00:00 are raised to that value.

AUTHENTICATION:
- Integrated (Windows) authentication is used unless --user is given
- The password comes from --password, DBFCOPY_PASSWORD, or a prompt

EXIT CODES:
  0  all phases completed
  1  invalid arguments or configuration
  2  the run failed (connection, truncate, create, read or bulk write)

EXAMPLES:
  dbfcopy --server db01 --database Staging --dbf customers.dbf --table Customers --create-table
  dbfcopy -S db01\\SQLEXPRESS -d Staging -U loader --dbf items.dbf -t dbo.Items --truncate
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Destination server
    #[arg(
        short = 'S',
        long,
        env = "DBFCOPY_SERVER",
        help = "SQL Server host (host, host,port, host:port or host\\instance)"
    )]
    pub server: String,

    /// Destination database
    #[arg(short = 'd', long, env = "DBFCOPY_DATABASE", help = "Destination database")]
    pub database: String,

    /// SQL login name
    #[arg(
        short = 'U',
        long,
        conflicts_with = "integrated",
        help = "SQL Server login (omit for integrated authentication)"
    )]
    pub user: Option<String>,

    /// SQL login password
    #[arg(
        short = 'P',
        long,
        env = "DBFCOPY_PASSWORD",
        hide_env_values = true,
        help = "Password for --user (prompted when omitted)"
    )]
    pub password: Option<String>,

    /// Use integrated authentication
    #[arg(
        short = 'E',
        long,
        help = "Use Windows integrated authentication (the default without --user)"
    )]
    pub integrated: bool,

    /// Source table
    #[arg(long, value_name = "PATH", help = "Path to the .dbf file")]
    pub dbf: PathBuf,

    /// Destination table
    #[arg(short = 't', long, help = "Destination table, optionally schema-qualified")]
    pub table: String,

    /// Bulk write timeout in seconds
    #[arg(
        long,
        default_value_t = 30,
        value_name = "SECONDS",
        help = "Timeout for each bulk write batch (0 = no limit)"
    )]
    pub bulk_copy_timeout: u64,

    /// Rows per bulk write
    #[arg(
        long,
        default_value_t = DEFAULT_BATCH_SIZE,
        value_parser = parse_batch_size,
        help = "Rows sent per bulk write batch"
    )]
    pub batch_size: usize,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECONDS", help = "Timeout for connecting")]
    pub connect_timeout: u64,

    /// Empty the table before loading
    #[arg(long, help = "Truncate the destination table before loading")]
    pub truncate: bool,

    /// Skip records marked deleted
    #[arg(long, help = "Skip records flagged as deleted in the .dbf file")]
    pub skip_deleted_records: bool,

    /// Drop and recreate the destination table
    #[arg(long, help = "Drop the destination table if it exists and create it from the .dbf columns")]
    pub create_table: bool,

    /// Code page override
    #[arg(
        long,
        value_name = "LABEL",
        help = "Character encoding of the .dbf text (e.g. cp866, windows-1251); defaults to the file's code page"
    )]
    pub encoding: Option<String>,

    /// Skip server certificate validation
    #[arg(long, help = "Trust the server certificate without validation")]
    pub trust_server_certificate: bool,

    /// Machine-readable summary
    #[arg(long, help = "Print the run summary as JSON")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,
}

fn parse_batch_size(value: &str) -> std::result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("batch size must be greater than 0".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(e.to_string()),
    }
}

impl Cli {
    /// Resolves the authentication mode, prompting for a missing password.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the password cannot be read.
    pub fn auth_mode(&self) -> Result<AuthMode> {
        self.auth_mode_with(rpassword::prompt_password)
    }

    /// Like [`Cli::auth_mode`] with an injectable password prompt.
    pub fn auth_mode_with<F>(&self, prompt: F) -> Result<AuthMode>
    where
        F: FnOnce(String) -> io::Result<String>,
    {
        let user = match &self.user {
            Some(user) if !self.integrated => user,
            _ => {
                if self.password.is_some() {
                    tracing::warn!("Ignoring password: using integrated authentication");
                }
                return Ok(AuthMode::Integrated);
            }
        };

        let password = match &self.password {
            Some(password) => password.clone(),
            None => prompt(format!("Password for {}: ", user)).map_err(|e| {
                DbfCopyError::invalid_argument(format!("Failed to read password: {}", e))
            })?,
        };

        Ok(AuthMode::Credentialed(Credentials::new(
            user.clone(),
            Some(password),
        )))
    }

    /// Builds and validates the connection settings.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an unusable server string or settings.
    pub fn connection_config(&self, auth: AuthMode) -> Result<ConnectionConfig> {
        let config = ConnectionConfig::from_server(&self.server, &self.database, auth)?
            .with_trust_server_certificate(self.trust_server_certificate)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout));
        config.validate()?;
        Ok(config)
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions::new(&self.table)
            .with_truncate(self.truncate)
            .with_create_table(self.create_table)
            .with_bulk_timeout(Duration::from_secs(self.bulk_copy_timeout))
            .with_batch_size(self.batch_size)
    }

    /// # Errors
    /// Returns `InvalidArgument` for an unknown encoding label.
    pub fn dbf_options(&self) -> Result<DbfOptions> {
        let options = DbfOptions::new().with_skip_deleted(self.skip_deleted_records);
        match &self.encoding {
            Some(label) => options.with_encoding_label(label),
            None => Ok(options),
        }
    }
}
