//! Database discovery through a directory catalog table.
//!
//! Sites that host one database per company keep a directory table listing
//! each database with a friendly description and the server that hosts it.
//! [`search`] runs a parameterized `LIKE` over that table so the user can
//! pick an export target.

use crate::error::{ExportError, Result};
use crate::source::DataSource;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Location and column names of the directory catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Table name, optionally qualified as `database.schema.table`
    pub table: String,
    pub description_column: String,
    pub database_column: String,
    pub server_column: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            table: "AbsWebSys.dbo.CompanyDatabase".to_string(),
            description_column: "Description".to_string(),
            database_column: "DatabaseName".to_string(),
            server_column: "Server".to_string(),
        }
    }
}

impl CatalogConfig {
    /// Validates every identifier.
    ///
    /// # Errors
    /// Returns a configuration error naming the first invalid identifier.
    pub fn validate(&self) -> Result<()> {
        quote_qualified(&self.table)?;
        for column in [
            &self.description_column,
            &self.database_column,
            &self.server_column,
        ] {
            quote_identifier(column)?;
        }
        Ok(())
    }

    /// Catalog search statement with the term bound as `@P1`.
    ///
    /// # Errors
    /// Returns a configuration error for invalid identifiers.
    pub fn search_sql(&self) -> Result<String> {
        let description = quote_identifier(&self.description_column)?;
        let database = quote_identifier(&self.database_column)?;
        let server = quote_identifier(&self.server_column)?;
        Ok(format!(
            "SELECT {description}, {database}, {server} FROM {table} \
             WHERE {database} LIKE @P1 ORDER BY {description}",
            table = quote_qualified(&self.table)?,
        ))
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub description: String,
    pub database: String,
    pub server: String,
}

/// Finds databases whose name contains `term`, ordered by description.
///
/// # Errors
/// Returns a configuration error for an invalid catalog and a query error
/// when the catalog cannot be read.
pub async fn search(
    source: &mut dyn DataSource,
    catalog: &CatalogConfig,
    term: &str,
) -> Result<Vec<DatabaseEntry>> {
    let sql = catalog.search_sql()?;
    let pattern = format!("%{}%", term.trim());
    debug!("Searching {} for '{}'", catalog.table, pattern);

    let result = source
        .query(&sql, &[pattern.as_str()])
        .await
        .map_err(|e| ExportError::query_failed("discovery", e))?;

    let entries: Vec<DatabaseEntry> = result
        .rows
        .iter()
        .map(|row| {
            let cell = |i: usize| row.get(i).map(ToString::to_string).unwrap_or_default();
            DatabaseEntry {
                description: cell(0),
                database: cell(1),
                server: cell(2),
            }
        })
        .collect();

    info!("Found {} database(s) matching '{}'", entries.len(), term.trim());
    Ok(entries)
}

fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ExportError::configuration(format!(
            "invalid catalog identifier '{}'",
            name
        )));
    }
    Ok(format!("[{}]", name))
}

fn quote_qualified(name: &str) -> Result<String> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 3 {
        return Err(ExportError::configuration(format!(
            "catalog table '{}' has too many name parts",
            name
        )));
    }
    let quoted = parts
        .into_iter()
        .map(quote_identifier)
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_sql() {
        let sql = CatalogConfig::default().search_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT [Description], [DatabaseName], [Server] FROM [AbsWebSys].[dbo].[CompanyDatabase] \
             WHERE [DatabaseName] LIKE @P1 ORDER BY [Description]"
        );
    }

    #[test]
    fn test_catalog_rejects_injection() {
        let catalog = CatalogConfig {
            table: "dbo.Companies; DROP TABLE x".to_string(),
            ..CatalogConfig::default()
        };
        assert!(catalog.validate().is_err());

        let catalog = CatalogConfig {
            server_column: "Server]".to_string(),
            ..CatalogConfig::default()
        };
        assert!(catalog.validate().is_err());

        let catalog = CatalogConfig {
            table: "a.b.c.d".to_string(),
            ..CatalogConfig::default()
        };
        assert!(catalog.validate().is_err());
    }
}
