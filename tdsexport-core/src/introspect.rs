//! Field documentation from the SQL Server catalog.
//!
//! Column name, type and nullability come from `INFORMATION_SCHEMA.COLUMNS`;
//! descriptions come from the `MS_Description` extended property. Each table
//! is described with one parameterized query.

use crate::error::{ExportError, Result};
use crate::models::{CellValue, FieldDescriptor};
use crate::source::DataSource;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

const COLUMNS_SQL: &str = "\
SELECT c.TABLE_SCHEMA, c.COLUMN_NAME, c.DATA_TYPE, c.CHARACTER_MAXIMUM_LENGTH,
       c.NUMERIC_PRECISION, c.NUMERIC_SCALE, c.IS_NULLABLE,
       CAST(ep.value AS nvarchar(4000)) AS COLUMN_DESCRIPTION
FROM INFORMATION_SCHEMA.COLUMNS AS c
LEFT JOIN sys.extended_properties AS ep
  ON ep.class = 1
 AND ep.name = 'MS_Description'
 AND ep.major_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME))
 AND ep.minor_id = COLUMNPROPERTY(
        OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
        c.COLUMN_NAME, 'ColumnId')
WHERE c.TABLE_NAME = @P1";

const SCHEMA_FILTER: &str = " AND c.TABLE_SCHEMA = @P2";

const ORDERING: &str = "
ORDER BY CASE WHEN c.TABLE_SCHEMA = SCHEMA_NAME() THEN 0 ELSE 1 END,
         c.TABLE_SCHEMA, c.ORDINAL_POSITION";

/// Matches the object name following `FROM` or `JOIN`, including bracketed
/// and multi-part names.
static TABLE_REFERENCE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| {
        Regex::new(
            r"(?i)\b(?:FROM|JOIN)\s+((?:\[[^\]]+\]|[A-Za-z_#@][\w$#@]*)(?:\s*\.\s*(?:\[[^\]]+\]|[A-Za-z_#@][\w$#@]*)){0,3})",
        )
    });

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Parses `table`, `schema.table` or `database.schema.table`, with or
    /// without brackets. The database part is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = split_name_parts(raw);
        let name = parts.pop().filter(|n| !n.is_empty())?;
        let schema = parts.pop().filter(|s| !s.is_empty());
        Some(Self { schema, name })
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn split_name_parts(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut bracketed = false;

    for c in raw.trim().chars() {
        match c {
            '[' if !bracketed => bracketed = true,
            ']' if bracketed => bracketed = false,
            '.' if !bracketed => parts.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

/// Object names following `FROM`/`JOIN` in `sql`, in first-seen order,
/// without duplicates. Temp tables and table variables are skipped.
///
/// # Errors
/// Returns an introspection error if the scanner pattern is unavailable.
pub fn referenced_tables(sql: &str) -> Result<Vec<String>> {
    let pattern = TABLE_REFERENCE
        .as_ref()
        .map_err(|e| ExportError::introspection(format!("table scanner unavailable: {}", e)))?;

    let mut tables: Vec<String> = Vec::new();
    for capture in pattern.captures_iter(sql) {
        let Some(name) = capture.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if name.starts_with('#') || name.starts_with('@') {
            continue;
        }
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            tables.push(name.to_string());
        }
    }
    Ok(tables)
}

/// Describes each table, keyed by the table name exactly as given.
///
/// Tables missing from the catalog map to an empty list.
///
/// # Errors
/// Returns [`ExportError::Introspection`] if the catalog cannot be queried.
pub async fn describe(
    source: &mut dyn DataSource,
    tables: &[String],
) -> Result<BTreeMap<String, Vec<FieldDescriptor>>> {
    let mut described = BTreeMap::new();

    for table in tables {
        if described.contains_key(table) {
            continue;
        }
        let table_ref = TableRef::parse(table).ok_or_else(|| {
            ExportError::introspection(format!("invalid table name '{}'", table))
        })?;
        let fields = describe_table(source, &table_ref).await?;
        if fields.is_empty() {
            warn!("Table {} not found in catalog", table_ref);
        } else {
            debug!("Described {} column(s) of {}", fields.len(), table_ref);
        }
        described.insert(table.clone(), fields);
    }

    Ok(described)
}

async fn describe_table(
    source: &mut dyn DataSource,
    table: &TableRef,
) -> Result<Vec<FieldDescriptor>> {
    let (sql, params): (String, Vec<&str>) = match &table.schema {
        Some(schema) => (
            format!("{COLUMNS_SQL}{SCHEMA_FILTER}{ORDERING}"),
            vec![table.name.as_str(), schema.as_str()],
        ),
        None => (format!("{COLUMNS_SQL}{ORDERING}"), vec![table.name.as_str()]),
    };

    let result = source.query(&sql, &params).await.map_err(|e| {
        ExportError::introspection_failed(format!("cannot read catalog for {}", table), e)
    })?;

    let mut fields = Vec::new();
    let mut first_schema: Option<String> = None;
    for row in &result.rows {
        let schema = text_at(row, 0).unwrap_or_default();
        // An unqualified name may exist in several schemas; keep the first.
        match &first_schema {
            None => first_schema = Some(schema.to_string()),
            Some(first) if first != schema => continue,
            Some(_) => {}
        }
        fields.push(parse_catalog_row(row, table)?);
    }
    Ok(fields)
}

fn parse_catalog_row(row: &[CellValue], table: &TableRef) -> Result<FieldDescriptor> {
    let name = text_at(row, 1).ok_or_else(|| {
        ExportError::introspection(format!("catalog row for {} has no column name", table))
    })?;
    let data_type = text_at(row, 2).unwrap_or_default();

    let mut field = FieldDescriptor::new(
        name,
        declared_type(data_type, int_at(row, 3), int_at(row, 4), int_at(row, 5)),
    );
    if let Some(nullable) = text_at(row, 6) {
        field = field.with_nullable(nullable.eq_ignore_ascii_case("YES"));
    }
    if let Some(description) = text_at(row, 7).filter(|d| !d.trim().is_empty()) {
        field = field.with_description(description.trim());
    }
    Ok(field)
}

/// Renders a catalog type as it would appear in DDL, e.g. `nvarchar(50)`,
/// `varchar(max)` or `decimal(18,2)`.
pub fn declared_type(
    data_type: &str,
    max_length: Option<i64>,
    precision: Option<i64>,
    scale: Option<i64>,
) -> String {
    match data_type.to_ascii_lowercase().as_str() {
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => match max_length {
            Some(-1) => format!("{}(max)", data_type),
            Some(len) => format!("{}({})", data_type, len),
            None => data_type.to_string(),
        },
        "decimal" | "numeric" => match (precision, scale) {
            (Some(p), Some(s)) => format!("{}({},{})", data_type, p, s),
            _ => data_type.to_string(),
        },
        _ => data_type.to_string(),
    }
}

fn text_at(row: &[CellValue], index: usize) -> Option<&str> {
    match row.get(index)? {
        CellValue::Text(s) => Some(s.as_str()),
        _ => None,
    }
}

fn int_at(row: &[CellValue], index: usize) -> Option<i64> {
    match row.get(index)? {
        CellValue::Integer(v) => Some(*v),
        _ => None,
    }
}
