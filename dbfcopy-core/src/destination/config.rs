//! Destination connection configuration.

use std::time::Duration;

use crate::Result;
use crate::error::DbfCopyError;
use crate::security::Credentials;

/// Default SQL Server TCP port
pub const DEFAULT_PORT: u16 = 1433;

/// How the tool authenticates against the server
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Windows integrated authentication of the running account
    Integrated,
    /// SQL Server login
    Credentialed(Credentials),
}

impl AuthMode {
    /// Short description for logs. Never includes the password.
    pub fn describe(&self) -> String {
        match self {
            AuthMode::Integrated => "integrated".to_string(),
            AuthMode::Credentialed(creds) => format!("SQL login '{}'", creds.username()),
        }
    }
}

/// Connection settings for the destination server.
///
/// # Example
/// ```rust
/// use dbfcopy_core::destination::{AuthMode, ConnectionConfig};
/// use dbfcopy_core::security::Credentials;
///
/// let auth = AuthMode::Credentialed(Credentials::new("loader".into(), Some("pw".into())));
/// let config = ConnectionConfig::from_server("db01,14330", "Warehouse", auth).unwrap();
///
/// assert_eq!(config.server, "db01");
/// assert_eq!(config.port, Some(14330));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host name or address
    pub server: String,
    pub port: Option<u16>,
    /// Named instance, resolved through SQL Browser
    pub instance: Option<String>,
    pub database: String,
    pub auth: AuthMode,
    /// Accept the server certificate without validation
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.server)?;
        if let Some(instance) = &self.instance {
            write!(f, "\\{}", instance)?;
        }
        if let Some(port) = self.port {
            write!(f, ",{}", port)?;
        }
        write!(f, "/{}", self.database)
        // Credentials are never part of the display form
    }
}

impl ConnectionConfig {
    /// Creates a config for a plain host name.
    pub fn new(server: impl Into<String>, database: impl Into<String>, auth: AuthMode) -> Self {
        Self {
            server: server.into(),
            port: None,
            instance: None,
            database: database.into(),
            auth,
            trust_server_certificate: false,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Creates a config from a server string in `host`, `host,port`,
    /// `host:port` or `host\instance` form.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the port is not a valid number.
    pub fn from_server(server: &str, database: impl Into<String>, auth: AuthMode) -> Result<Self> {
        let (host, port, instance) = parse_server(server)?;
        let mut config = Self::new(host, database, auth);
        config.port = port;
        config.instance = instance;
        Ok(config)
    }

    /// Builder method to set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set a named instance.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Port to connect to when no instance lookup is needed.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Validates connection settings before any network access.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if a value is missing or unusable on this platform.
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(DbfCopyError::invalid_argument("server cannot be empty"));
        }

        if self.database.trim().is_empty() {
            return Err(DbfCopyError::invalid_argument("database cannot be empty"));
        }

        if self.port == Some(0) {
            return Err(DbfCopyError::invalid_argument("port must be greater than 0"));
        }

        if self.instance.as_deref().is_some_and(|i| i.trim().is_empty()) {
            return Err(DbfCopyError::invalid_argument("instance name cannot be empty"));
        }

        if self.connect_timeout.is_zero() {
            return Err(DbfCopyError::invalid_argument(
                "connect_timeout must be greater than 0",
            ));
        }

        match &self.auth {
            AuthMode::Credentialed(creds) if creds.username().trim().is_empty() => {
                return Err(DbfCopyError::invalid_argument("user name cannot be empty"));
            }
            AuthMode::Integrated if !cfg!(windows) => {
                return Err(DbfCopyError::invalid_argument(
                    "integrated authentication is only available on Windows; supply --user",
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

/// Splits a server string into host, port and instance.
fn parse_server(server: &str) -> Result<(String, Option<u16>, Option<String>)> {
    let server = server.trim();
    let server = server.strip_prefix("tcp:").unwrap_or(server);

    let (host, port, instance) = if let Some((host, instance)) = server.split_once('\\') {
        (host, None, Some(instance.to_string()))
    } else if let Some((host, port)) = server.split_once(',') {
        (host, Some(parse_port(port)?), None)
    } else if let Some((host, port)) = server.split_once(':').filter(|(_, p)| !p.contains(':')) {
        (host, Some(parse_port(port)?), None)
    } else {
        (server, None, None)
    };

    let host = match host.trim() {
        "." | "(local)" | "(localdb)" => "localhost",
        other => other,
    };
    Ok((host.to_string(), port, instance))
}

fn parse_port(port: &str) -> Result<u16> {
    port.trim()
        .parse::<u16>()
        .map_err(|_| DbfCopyError::invalid_argument(format!("invalid port '{}'", port.trim())))
}
