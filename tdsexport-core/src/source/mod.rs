//! Query execution against a live database session.
//!
//! The export engine, introspector and discovery search all talk to the
//! database through [`DataSource`]. The production implementation is
//! [`MssqlSource`]; tests drive the pipeline with in-memory sources.

mod mssql;

pub use mssql::{MssqlSource, SessionOptions};

use crate::models::CellValue;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure reported by a data source. Callers attach the pipeline stage.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Error raised by the TDS driver or the server
    #[error("{0}")]
    Driver(#[from] tiberius::error::Error),

    /// The configured query timeout elapsed
    #[error("query timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The session was already closed
    #[error("session is closed")]
    Closed,

    /// Any other failure, described by message
    #[error("{0}")]
    Message(String),
}

/// Column metadata reported by the driver for a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    pub name: String,
    pub declared_type: String,
}

impl ResultColumn {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }
}

/// First result set of a query: ordered columns plus positional rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

/// A read-only query session.
#[async_trait]
pub trait DataSource: Send {
    /// Executes `sql` with positional `@P1..@Pn` text parameters and returns
    /// the first result set.
    ///
    /// # Errors
    /// Returns [`SourceError`] on driver failure, timeout or a closed session.
    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<ResultSet, SourceError>;

    /// Ends the session. Further queries fail with [`SourceError::Closed`].
    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Closes `source` and hands back `outcome` unchanged, whether it succeeded
/// or not. A failure to close is logged and never replaces the outcome.
pub async fn close_after<T>(
    source: &mut dyn DataSource,
    outcome: crate::error::Result<T>,
) -> crate::error::Result<T> {
    if let Err(e) = source.close().await {
        warn!("Failed to close session cleanly: {}", e);
    }
    outcome
}
