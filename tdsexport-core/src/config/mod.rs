//! Job file loading and validation.
//!
//! A job file is YAML:
//!
//! ```yaml
//! connection:
//!   server: 'db01\PROD'
//!   database: Loans
//!   query_timeout_secs: 600
//! output: exports/loans.xlsx
//! theme: auto
//! cleaning:
//!   omit_patterns: ['(?i)recid']
//!   drop_empty_columns: true
//!   date_format: '%m/%d/%Y'
//! queries:
//!   - name: Loans
//!     sql: SELECT Account, FundDate, NoteRate FROM [TDS Loans]
//!     tables: ['TDS Loans']
//!     descriptions:
//!       NoteRate: Current note interest rate
//!   - name: Properties
//!     sql: SELECT l.Account, p.*, i.* FROM [TDS Properties] p ...
//!     column_prefixes:
//!       TDS Properties: 'Property: '
//!       TDS Insurance: 'Insurance: '
//! ```

mod connection;

pub use connection::{ConnectionConfig, ConnectionTarget};

use crate::clean::CleaningRules;
use crate::discovery::CatalogConfig;
use crate::error::{ExportError, Result};
use crate::models::NamedQuery;
use crate::theme::ThemePreference;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parsed job file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Workbook path; the command line may override it
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub theme: ThemePreference,
    #[serde(default)]
    pub cleaning: CleaningRules,
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Ordered named queries; one sheet each
    #[serde(default)]
    pub queries: Vec<NamedQuery>,
}

impl JobConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns a configuration error when the file cannot be read, parsed or
    /// validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExportError::configuration(format!(
                "cannot read job file {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Loaded job file {}", path.display());
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    /// Returns a configuration error for malformed YAML or invalid values.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ExportError::configuration(format!("invalid job file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.cleaning.compile()?;
        self.catalog.validate()?;

        let mut seen = HashSet::new();
        for (index, query) in self.queries.iter().enumerate() {
            let name = query.name.trim();
            if name.is_empty() {
                return Err(ExportError::configuration(format!(
                    "queries[{}].name cannot be empty",
                    index
                )));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ExportError::configuration(format!(
                    "duplicate query name '{}'",
                    name
                )));
            }
            if query.sql.trim().is_empty() {
                return Err(ExportError::configuration(format!(
                    "query '{}' has no sql",
                    name
                )));
            }
            if query.tables.iter().any(|t| t.trim().is_empty()) {
                return Err(ExportError::configuration(format!(
                    "query '{}' lists an empty table name",
                    name
                )));
            }
            if query
                .column_prefixes
                .iter()
                .any(|(table, prefix)| table.trim().is_empty() || prefix.is_empty())
            {
                return Err(ExportError::configuration(format!(
                    "query '{}' has a column prefix with an empty table or prefix",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Ensures there is at least one query to export.
    ///
    /// # Errors
    /// Returns a configuration error when `queries` is empty.
    pub fn require_queries(&self) -> Result<&[NamedQuery]> {
        if self.queries.is_empty() {
            return Err(ExportError::configuration("job file defines no queries"));
        }
        Ok(&self.queries)
    }

    /// Output path, preferring `override_path`.
    ///
    /// # Errors
    /// Returns a configuration error when neither is set.
    pub fn output_path(&self, override_path: Option<&Path>) -> Result<PathBuf> {
        override_path
            .map(Path::to_path_buf)
            .or_else(|| self.output.clone())
            .ok_or_else(|| {
                ExportError::configuration("no output path: set output in the job file or --output")
            })
    }
}
