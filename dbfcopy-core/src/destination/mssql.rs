//! SQL Server destination on tiberius.
//!
//! Connections run over tokio TCP with the tokio-util compat layer. Named
//! instances are resolved through the SQL Browser service.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, ColumnData, Config, SqlBrowser, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use super::config::{AuthMode, ConnectionConfig};
use super::{Connector, Destination};
use crate::Result;
use crate::error::DbfCopyError;
use crate::models::{SanitizedRow, SqlValue};
use crate::schema::quote_table_name;

const APPLICATION_NAME: &str = "dbfcopy";
/// `datetime` stores time as 1/300 second ticks
const TICKS_PER_SECOND: u64 = 300;
const TICKS_PER_DAY: u64 = TICKS_PER_SECOND * 86_400;

type TdsClient = Client<Compat<TcpStream>>;

/// Connector for Microsoft SQL Server.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    config: ConnectionConfig,
}

impl MssqlConnector {
    /// Creates a connector after validating the configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn tiberius_config(&self) -> Result<Config> {
        let mut config = Config::new();
        config.host(&self.config.server);
        config.port(self.config.effective_port());
        if let Some(instance) = &self.config.instance {
            config.instance_name(instance);
        }
        config.database(&self.config.database);
        config.application_name(APPLICATION_NAME);
        if self.config.trust_server_certificate {
            config.trust_cert();
        }

        match &self.config.auth {
            AuthMode::Credentialed(creds) => {
                config.authentication(AuthMethod::sql_server(creds.username(), creds.password()));
            }
            AuthMode::Integrated => integrated_auth(&mut config)?,
        }

        Ok(config)
    }

    async fn open_tcp(&self, config: &Config) -> Result<TcpStream> {
        let tcp = if self.config.instance.is_some() && self.config.port.is_none() {
            TcpStream::connect_named(config)
                .await
                .map_err(|e| self.connection_error("Failed to resolve named instance", e))?
        } else {
            TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| self.connection_error("Failed to reach server", e))?
        };

        tcp.set_nodelay(true)
            .map_err(|e| self.connection_error("Failed to configure socket", e))?;
        Ok(tcp)
    }

    async fn open(&self) -> Result<TdsClient> {
        let config = self.tiberius_config()?;
        let tcp = self.open_tcp(&config).await?;

        match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure gateways redirect the login to another node
            Err(tiberius::error::Error::Routing { host, port }) => {
                debug!("Login routed to {}:{}", host, port);
                let mut routed = config;
                routed.host(&host);
                routed.port(port);
                let tcp = TcpStream::connect(routed.get_addr())
                    .await
                    .map_err(|e| self.connection_error("Failed to reach routed server", e))?;
                tcp.set_nodelay(true)
                    .map_err(|e| self.connection_error("Failed to configure socket", e))?;
                Client::connect(routed, tcp.compat_write())
                    .await
                    .map_err(|e| self.connection_error("Login failed", e))
            }
            Err(e) => Err(self.connection_error("Login failed", e)),
        }
    }

    fn connection_error<E>(&self, context: &str, error: E) -> DbfCopyError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DbfCopyError::connection_failed(format!("{} ({})", context, self.config), error)
    }
}

#[cfg(windows)]
fn integrated_auth(config: &mut Config) -> Result<()> {
    config.authentication(AuthMethod::Integrated);
    Ok(())
}

#[cfg(not(windows))]
fn integrated_auth(_config: &mut Config) -> Result<()> {
    Err(DbfCopyError::invalid_argument(
        "integrated authentication is only available on Windows; supply --user",
    ))
}

#[async_trait]
impl Connector for MssqlConnector {
    async fn connect(&self) -> Result<Box<dyn Destination>> {
        let timeout = self.config.connect_timeout;
        let client = tokio::time::timeout(timeout, self.open())
            .await
            .map_err(|e| self.connection_error("Timed out connecting", e))??;
        info!("Connected to {}", self.config);
        Ok(Box::new(MssqlDestination { client }))
    }

    fn describe(&self) -> String {
        self.config.to_string()
    }
}

/// An open SQL Server session.
struct MssqlDestination {
    client: TdsClient,
}

#[async_trait]
impl Destination for MssqlDestination {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("Executing: {}", sql);
        let result = self
            .client
            .execute(sql, &[])
            .await
            .map_err(|e| DbfCopyError::query_failed("Statement failed", e))?;
        Ok(result.total())
    }

    async fn bulk_write(&mut self, table: &str, rows: Vec<SanitizedRow>) -> Result<u64> {
        let target = quote_table_name(table);
        let mut request = self
            .client
            .bulk_insert(&target)
            .await
            .map_err(|e| bulk_write_error(table, e))?;

        for row in rows {
            request
                .send(token_row(row))
                .await
                .map_err(|e| bulk_write_error(table, e))?;
        }

        let result = request
            .finalize()
            .await
            .map_err(|e| bulk_write_error(table, e))?;
        Ok(result.total())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client
            .close()
            .await
            .map_err(|e| DbfCopyError::connection_failed("Failed to close connection", e))
    }
}

/// A failed batch is rolled back by the server, so nothing of it was copied.
fn bulk_write_error(table: &str, error: tiberius::error::Error) -> DbfCopyError {
    DbfCopyError::BulkWrite {
        table: table.to_string(),
        copied: 0,
        source: Box::new(error),
    }
}

fn token_row(row: SanitizedRow) -> TokenRow<'static> {
    let mut token_row = TokenRow::new();
    for value in row.into_values() {
        token_row.push(column_data(value));
    }
    token_row
}

fn column_data(value: SqlValue) -> ColumnData<'static> {
    match value {
        SqlValue::Text(text) => ColumnData::String(text.map(Cow::Owned)),
        SqlValue::Int(value) => ColumnData::I32(value),
        SqlValue::BigInt(value) => ColumnData::I64(value),
        SqlValue::Bit(value) => ColumnData::Bit(Some(value)),
        SqlValue::Decimal(value) => ColumnData::Numeric(value.map(|decimal| {
            // Scale is bounded by the column's decimal count, well below u8::MAX
            Numeric::new_with_scale(decimal.mantissa(), decimal.scale() as u8)
        })),
        SqlValue::DateTime(value) => ColumnData::DateTime(value.map(legacy_datetime)),
    }
}

/// Encodes a timestamp as SQL Server `datetime`: days since 1900-01-01 and
/// 1/300 second ticks since midnight.
fn legacy_datetime(value: NaiveDateTime) -> tiberius::time::DateTime {
    let epoch = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN);
    let mut days = (value.date() - epoch).num_days();

    let time = value.time();
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(time.nanosecond().min(999_999_999));
    let mut ticks = (nanos * TICKS_PER_SECOND + 500_000_000) / 1_000_000_000;
    if ticks >= TICKS_PER_DAY {
        days += 1;
        ticks -= TICKS_PER_DAY;
    }

    tiberius::time::DateTime::new(
        i32::try_from(days).unwrap_or(i32::MAX),
        u32::try_from(ticks).unwrap_or(0),
    )
}
