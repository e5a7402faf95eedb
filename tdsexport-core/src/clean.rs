//! Column cleaning applied to raw result sets before documentation merge.
//!
//! All rules are off by default. Rules only ever remove whole columns or
//! rewrite individual cells, so every row stays aligned with the column list.

use crate::error::{ExportError, Result};
use crate::models::CellValue;
use crate::source::ResultSet;
use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::debug;

/// Text layouts recognized in date-named text columns.
const DATE_TIME_INPUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];
const DATE_INPUTS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Job-level cleaning configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningRules {
    /// Exact column names to drop
    pub omit_columns: Vec<String>,
    /// Regular expressions; matching column names are dropped
    pub omit_patterns: Vec<String>,
    /// Drop columns whose every value is vacant
    pub drop_empty_columns: bool,
    /// chrono format applied to date values, e.g. `%m/%d/%Y`
    pub date_format: Option<String>,
}

impl CleaningRules {
    /// Validates the rules and compiles the patterns.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid regex or date format.
    pub fn compile(&self) -> Result<Cleaner> {
        let patterns = self
            .omit_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ExportError::configuration(format!("invalid omit pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(format) = &self.date_format {
            if format.trim().is_empty()
                || StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
                || render_date(NaiveDateTime::default(), format).is_none()
            {
                return Err(ExportError::configuration(format!(
                    "invalid date format '{}'",
                    format
                )));
            }
        }

        Ok(Cleaner {
            omit_columns: self.omit_columns.clone(),
            patterns,
            drop_empty_columns: self.drop_empty_columns,
            date_format: self.date_format.clone(),
        })
    }
}

/// Compiled [`CleaningRules`].
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    omit_columns: Vec<String>,
    patterns: Vec<Regex>,
    drop_empty_columns: bool,
    date_format: Option<String>,
}

impl Cleaner {
    /// Applies every rule to `result`.
    pub fn apply(&self, mut result: ResultSet) -> ResultSet {
        let keep: Vec<bool> = result
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| !self.should_drop(&column.name, index, &result))
            .collect();

        if keep.iter().any(|k| !k) {
            let dropped: Vec<&str> = result
                .columns
                .iter()
                .zip(&keep)
                .filter(|(_, k)| !**k)
                .map(|(c, _)| c.name.as_str())
                .collect();
            debug!("Dropping columns {:?}", dropped);

            result.columns = retain_positions(result.columns, &keep);
            result.rows = result
                .rows
                .into_iter()
                .map(|row| retain_positions(row, &keep))
                .collect();
        }

        if let Some(format) = &self.date_format {
            let date_named: Vec<bool> = result
                .columns
                .iter()
                .map(|c| c.name.to_ascii_lowercase().contains("date"))
                .collect();
            for row in &mut result.rows {
                for (cell, named) in row.iter_mut().zip(&date_named) {
                    format_date_cell(cell, format, *named);
                }
            }
        }

        result
    }

    fn should_drop(&self, name: &str, index: usize, result: &ResultSet) -> bool {
        if self.omit_columns.iter().any(|c| c == name) {
            return true;
        }
        if self.patterns.iter().any(|p| p.is_match(name)) {
            return true;
        }
        // A zero-row result keeps every column.
        self.drop_empty_columns
            && !result.rows.is_empty()
            && result
                .rows
                .iter()
                .all(|row| row.get(index).is_none_or(CellValue::is_vacant))
    }
}

fn retain_positions<T>(values: Vec<T>, keep: &[bool]) -> Vec<T> {
    values
        .into_iter()
        .zip(keep)
        .filter_map(|(value, k)| k.then_some(value))
        .collect()
}

fn format_date_cell(cell: &mut CellValue, format: &str, date_named: bool) {
    let value = match cell {
        CellValue::Date(d) => d.and_hms_opt(0, 0, 0),
        CellValue::DateTime(dt) => Some(*dt),
        CellValue::Text(text) if date_named => parse_date_text(text),
        _ => None,
    };
    // Cells the format cannot render stay as they are.
    if let Some(formatted) = value.and_then(|dt| render_date(dt, format)) {
        *cell = CellValue::Text(formatted);
    }
}

/// Formats without panicking; `None` when the format needs fields a naive
/// date-time does not carry (such as `%z`).
fn render_date(value: NaiveDateTime, format: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", value.format(format)).ok()?;
    Some(out)
}

fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATE_TIME_INPUTS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_INPUTS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
