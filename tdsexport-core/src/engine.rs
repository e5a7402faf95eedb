//! The export engine: named queries in, an [`ExportJob`] out.
//!
//! For each query, in order:
//!
//! 1. execute it (any failure aborts the whole job)
//! 2. apply the cleaning rules
//! 3. describe the referenced tables (failure degrades to no documentation)
//! 4. merge catalog metadata and configured descriptions into the fields
//!
//! The engine performs no file I/O; writing is the workbook writer's job.

use crate::clean::Cleaner;
use crate::error::{ExportError, Result};
use crate::introspect::{self, TableRef};
use crate::models::{Dataset, ExportJob, FieldDescriptor, NamedQuery};
use crate::source::{DataSource, ResultColumn, close_after};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs named queries and assembles documented datasets.
#[derive(Debug, Clone, Default)]
pub struct ExportEngine {
    cleaner: Cleaner,
}

impl ExportEngine {
    pub fn new(cleaner: Cleaner) -> Self {
        Self { cleaner }
    }

    /// Executes `queries` in order against `source`.
    ///
    /// # Errors
    /// Returns [`ExportError::Query`] for the first query that fails; no
    /// partial job is returned. Catalog failures are logged and produce
    /// blank documentation instead.
    pub async fn run(
        &self,
        source: &mut dyn DataSource,
        queries: &[NamedQuery],
        output_path: impl Into<PathBuf>,
    ) -> Result<ExportJob> {
        let mut job = ExportJob::new(output_path);

        for query in queries {
            let started = Instant::now();
            let dataset = self.run_query(source, query).await?;
            info!(
                "Dataset '{}': {} row(s), {} column(s) in {:.2?}",
                dataset.name(),
                dataset.row_count(),
                dataset.fields().len(),
                started.elapsed()
            );
            job.push(dataset);
        }

        Ok(job)
    }

    /// Runs `queries` like [`run`](Self::run), then closes `source` whatever
    /// the outcome.
    ///
    /// # Errors
    /// Same as [`run`](Self::run); a failure to close is only logged.
    pub async fn export(
        &self,
        source: &mut dyn DataSource,
        queries: &[NamedQuery],
        output_path: impl Into<PathBuf>,
    ) -> Result<ExportJob> {
        let outcome = self.run(source, queries, output_path).await;
        close_after(source, outcome).await
    }

    async fn run_query(&self, source: &mut dyn DataSource, query: &NamedQuery) -> Result<Dataset> {
        debug!("Executing query '{}'", query.name);
        let result = source
            .query(&query.sql, &[])
            .await
            .map_err(|e| ExportError::query_failed(&query.name, e))?;
        let result = self.cleaner.apply(result);

        let catalog = documentation_for(source, query).await;
        let fields = merge_fields(
            &result.columns,
            &catalog,
            &query.descriptions,
            &query.column_prefixes,
        );

        Dataset::new(query.name.clone(), fields, result.rows)
    }
}

/// Catalog fields of one referenced table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableCatalog {
    /// Table name as listed in the query or job file
    pub table: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TableCatalog {
    pub fn new(table: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            table: table.into(),
            fields,
        }
    }

    fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Catalog fields of each referenced table, in table order. Empty when the
/// catalog is unavailable.
async fn documentation_for(source: &mut dyn DataSource, query: &NamedQuery) -> Vec<TableCatalog> {
    let tables = if query.tables.is_empty() {
        match introspect::referenced_tables(&query.sql) {
            Ok(tables) => tables,
            Err(e) => {
                warn!("{}; continuing without documentation for '{}'", e, query.name);
                return Vec::new();
            }
        }
    } else {
        query.tables.clone()
    };
    if tables.is_empty() {
        return Vec::new();
    }

    match introspect::describe(source, &tables).await {
        Ok(mut described) => tables
            .iter()
            .filter_map(|table| {
                described
                    .remove(table)
                    .map(|fields| TableCatalog::new(table.clone(), fields))
            })
            .collect(),
        Err(e) => {
            warn!("{}; continuing without documentation for '{}'", e, query.name);
            Vec::new()
        }
    }
}

/// Builds one field per result column.
///
/// Catalog metadata is matched by exact column name, first table first.
/// Configured descriptions take precedence over catalog descriptions.
/// Repeated column names become `Name`, `Name.1`, `Name.2`, ...
///
/// With `prefixes` (table → header prefix), the n-th occurrence of a column
/// name is attributed to the n-th table defining it; columns of a prefixed
/// table get the prefix in their header and are documented from that table.
/// Headers already carrying a configured prefix (aliased in SQL) are
/// documented under the name without it.
pub fn merge_fields(
    columns: &[ResultColumn],
    catalog: &[TableCatalog],
    overrides: &BTreeMap<String, String>,
    prefixes: &BTreeMap<String, String>,
) -> Vec<FieldDescriptor> {
    let mut used: HashSet<String> = HashSet::new();
    let mut occurrences: HashMap<&str, usize> = HashMap::new();

    columns
        .iter()
        .map(|column| {
            let (header, base, origin) = match aliased(&column.name, catalog, prefixes) {
                Some((base, origin)) => (column.name.clone(), base, origin),
                None => {
                    let seen = occurrences.entry(column.name.as_str()).or_insert(0);
                    let origin = catalog
                        .iter()
                        .filter(|t| t.field(&column.name).is_some())
                        .nth(*seen)
                        .filter(|t| prefix_for(&t.table, prefixes).is_some());
                    *seen += 1;
                    let header = match origin.and_then(|t| prefix_for(&t.table, prefixes)) {
                        Some(prefix) => format!("{}{}", prefix, column.name),
                        None => column.name.clone(),
                    };
                    (header, column.name.as_str(), origin)
                }
            };

            let documented = match origin {
                Some(table) => table.field(base),
                None => catalog.iter().find_map(|t| t.field(base)),
            };
            let mut field = documented.cloned().unwrap_or_else(|| FieldDescriptor {
                name: base.to_string(),
                declared_type: column.declared_type.clone(),
                nullable: None,
                description: None,
            });

            if let Some(text) = overrides.get(&header).or_else(|| overrides.get(base)) {
                field.description = normalize_description(text);
            }

            field.name = unique_name(&header, &mut used);
            field
        })
        .collect()
}

/// For a header that already starts with a configured prefix: the name
/// without it and the prefixed table's catalog, when described.
fn aliased<'a>(
    header: &'a str,
    catalog: &'a [TableCatalog],
    prefixes: &BTreeMap<String, String>,
) -> Option<(&'a str, Option<&'a TableCatalog>)> {
    prefixes.iter().find_map(|(table, prefix)| {
        let base = header.strip_prefix(prefix.as_str())?;
        let origin = catalog.iter().find(|t| same_table(&t.table, table));
        Some((base, origin))
    })
}

fn prefix_for<'a>(table: &str, prefixes: &'a BTreeMap<String, String>) -> Option<&'a str> {
    prefixes
        .iter()
        .find(|(key, _)| same_table(table, key))
        .map(|(_, prefix)| prefix.as_str())
}

/// Compares table names ignoring brackets and case; a configured name without
/// a schema matches any schema.
fn same_table(listed: &str, configured: &str) -> bool {
    match (TableRef::parse(listed), TableRef::parse(configured)) {
        (Some(listed), Some(configured)) => {
            listed.name.eq_ignore_ascii_case(&configured.name)
                && configured.schema.as_deref().is_none_or(|schema| {
                    listed
                        .schema
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case(schema))
                })
        }
        _ => false,
    }
}

fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}.{}", name, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Trims each line and removes blank lines. Returns `None` when nothing is
/// left.
pub fn normalize_description(text: &str) -> Option<String> {
    let normalized = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!normalized.is_empty()).then_some(normalized)
}
