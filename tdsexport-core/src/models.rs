//! Core data models for the export pipeline.
//!
//! A run produces one [`ExportJob`] holding one [`Dataset`] per named query.
//! Each dataset pairs an ordered list of [`FieldDescriptor`]s with rows that
//! are positionally aligned to it; [`Dataset::new`] is the only way to build
//! one and it rejects ragged rows.

use crate::error::{ExportError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A single cell value read from a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Returns true for NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Returns true for values that carry no information: NULL, zero, blank
    /// text, or the literal strings `NULL`, `null` and `None`.
    pub fn is_vacant(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Integer(v) => *v == 0,
            CellValue::Float(v) => *v == 0.0,
            CellValue::Text(s) => {
                let trimmed = s.trim();
                trimmed.is_empty()
                    || matches!(trimmed, "0" | "0.0" | "NULL" | "null" | "None")
            }
            CellValue::Bool(_)
            | CellValue::Date(_)
            | CellValue::Time(_)
            | CellValue::DateTime(_) => false,
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Integer(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(v) => write!(f, "{v}"),
            CellValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            CellValue::Time(v) => write!(f, "{}", v.format("%H:%M:%S")),
            CellValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Metadata describing one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub declared_type: String,
    /// `None` when neither the catalog nor the driver reported nullability
    pub nullable: Option<bool>,
    pub description: Option<String>,
}

impl FieldDescriptor {
    /// Creates a descriptor with no documentation.
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: None,
            description: None,
        }
    }

    /// Builder method to set nullability.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description text, empty when undocumented.
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    /// Nullability rendered for the documentation sheet.
    pub fn nullability_label(&self) -> &'static str {
        match self.nullable {
            Some(true) => "YES",
            Some(false) => "NO",
            None => "",
        }
    }
}

/// One named query as declared in the job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedQuery {
    /// Dataset and sheet name
    pub name: String,
    /// Read-only SQL text
    pub sql: String,
    /// Tables to introspect for documentation; scanned from the SQL when empty
    #[serde(default)]
    pub tables: Vec<String>,
    /// Field descriptions that take precedence over the catalog
    #[serde(default)]
    pub descriptions: BTreeMap<String, String>,
    /// Header prefix per table, e.g. `TDS Properties: "Property: "`
    #[serde(default)]
    pub column_prefixes: BTreeMap<String, String>,
}

impl NamedQuery {
    /// Creates a query with no explicit tables or descriptions.
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            tables: Vec::new(),
            descriptions: BTreeMap::new(),
            column_prefixes: BTreeMap::new(),
        }
    }
}

/// Named result of one query, with rows aligned to `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    fields: Vec<FieldDescriptor>,
    rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    /// Builds a dataset, rejecting any row whose width differs from the
    /// field count.
    ///
    /// # Errors
    /// Returns a query error naming the first ragged row.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
        rows: Vec<Vec<CellValue>>,
    ) -> Result<Self> {
        let name = name.into();
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != fields.len())
        {
            return Err(ExportError::query(
                name,
                format!(
                    "row {} has {} values but the result has {} columns",
                    index + 1,
                    row.len(),
                    fields.len()
                ),
            ));
        }
        Ok(Self { name, fields, rows })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// The top-level unit of work: one workbook produced from ordered datasets.
#[derive(Debug, Clone)]
pub struct ExportJob {
    datasets: Vec<Dataset>,
    output_path: PathBuf,
    generated_at: DateTime<Utc>,
}

impl ExportJob {
    /// Creates an empty job stamped with the current time.
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            datasets: Vec::new(),
            output_path: output_path.into(),
            generated_at: Utc::now(),
        }
    }

    /// Appends a dataset, preserving query order.
    pub fn push(&mut self, dataset: Dataset) {
        self.datasets.push(dataset);
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Total rows across all datasets.
    pub fn row_count(&self) -> usize {
        self.datasets.iter().map(Dataset::row_count).sum()
    }

    /// Total field descriptors across all datasets.
    pub fn field_count(&self) -> usize {
        self.datasets.iter().map(|d| d.fields().len()).sum()
    }
}
