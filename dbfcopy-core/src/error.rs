//! Error types for the dBase to SQL Server load pipeline.
//!
//! Every phase of a run has its own variant so the orchestrator can report
//! exactly where a run stopped. Passwords never appear in error messages:
//! connection errors carry a sanitized context string and the driver error
//! as their source.

use std::time::Duration;
use thiserror::Error;

/// Boxed error used as the source of phase failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for dbfcopy operations.
#[derive(Debug, Error)]
pub enum DbfCopyError {
    /// Malformed invocation or configuration, detected before any I/O
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Destination database could not be reached (credentials sanitized)
    #[error("Database connection failed: {context}")]
    Connection {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Truncating the destination table failed
    #[error("Failed to truncate table '{table}'")]
    Truncate {
        table: String,
        #[source]
        source: BoxError,
    },

    /// Dropping or creating the destination table failed
    #[error("Failed to create table '{table}'")]
    CreateTable {
        table: String,
        #[source]
        source: BoxError,
    },

    /// A bulk write batch failed; `copied` rows were acknowledged before it
    #[error("Bulk write into '{table}' failed after {copied} acknowledged rows")]
    BulkWrite {
        table: String,
        copied: u64,
        #[source]
        source: BoxError,
    },

    /// A bulk write batch exceeded the configured timeout
    #[error(
        "Bulk write into '{table}' timed out after {timeout:?} ({copied} rows acknowledged before the batch)"
    )]
    BulkWriteTimeout {
        table: String,
        timeout: Duration,
        copied: u64,
    },

    /// Source column type has no destination mapping
    #[error("Unsupported type '{type_name}' for column '{column}'")]
    UnsupportedType { column: String, type_name: String },

    /// Source file is unreadable or malformed
    #[error("Source read failed: {context}")]
    Source {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A statement sent to the destination failed
    #[error("Query execution failed: {context}")]
    Query {
        context: String,
        #[source]
        source: BoxError,
    },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results with DbfCopyError
pub type Result<T> = std::result::Result<T, DbfCopyError>;

/// Plain message error for sources that have no richer error type.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Message(pub String);

impl DbfCopyError {
    /// Creates an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection error with sanitized context
    pub fn connection_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a query execution error
    pub fn query_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Query {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a source read error
    pub fn source_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Source {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a malformed-source error from a plain message
    pub fn malformed_source(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::source_failed(context, Message(detail.into()))
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an unsupported type error
    pub fn unsupported_type(column: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            column: column.into(),
            type_name: type_name.into(),
        }
    }

    /// Number of rows acknowledged before this error, for bulk write failures.
    pub fn copied_rows(&self) -> Option<u64> {
        match self {
            Self::BulkWrite { copied, .. } | Self::BulkWriteTimeout { copied, .. } => {
                Some(*copied)
            }
            _ => None,
        }
    }

    /// Whether the error is a timeout-class failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::BulkWriteTimeout { .. })
    }

    /// Renders the error together with its source chain on one line.
    pub fn display_chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            rendered.push_str(": ");
            rendered.push_str(&cause.to_string());
            source = cause.source();
        }
        rendered
    }
}
