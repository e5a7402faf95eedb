//! Workbook writer.
//!
//! Lays an [`ExportJob`] out as one sheet per dataset plus a
//! `Documentation` sheet, serializes it in memory, then replaces the target
//! file atomically: the bytes go to a temporary file in the target
//! directory which is renamed over the target only once fully written. A
//! failed write leaves any existing file untouched.

mod render;

use crate::error::{ExportError, Result};
use crate::models::ExportJob;
use crate::theme::Theme;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Name of the field documentation sheet.
pub const DOCUMENTATION_SHEET: &str = "Documentation";

/// Excel's limit on sheet name length.
const MAX_SHEET_NAME: usize = 31;

/// One row of the documentation sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentationEntry {
    pub dataset: String,
    pub field: String,
    pub declared_type: String,
    pub nullable: String,
    pub description: String,
}

/// Sheet names and documentation rows for a job, computed before any
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookPlan {
    /// Sheet name per dataset, in dataset order
    pub sheet_names: Vec<String>,
    pub documentation: Vec<DocumentationEntry>,
}

impl WorkbookPlan {
    pub fn for_job(job: &ExportJob) -> Self {
        let mut taken: HashSet<String> = HashSet::new();
        taken.insert(DOCUMENTATION_SHEET.to_lowercase());

        let sheet_names: Vec<String> = job
            .datasets()
            .iter()
            .map(|d| unique_sheet_name(&sanitize_sheet_name(d.name()), &mut taken))
            .collect();
        let documentation = entries_for(job, &sheet_names);

        Self {
            sheet_names,
            documentation,
        }
    }
}

/// One entry per distinct (sheet, field), sorted by sheet name then field.
/// The dataset column holds the sheet name the rows were written to.
pub fn documentation_entries(job: &ExportJob) -> Vec<DocumentationEntry> {
    WorkbookPlan::for_job(job).documentation
}

fn entries_for(job: &ExportJob, sheet_names: &[String]) -> Vec<DocumentationEntry> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut entries: Vec<DocumentationEntry> = job
        .datasets()
        .iter()
        .zip(sheet_names)
        .flat_map(|(d, sheet)| d.fields().iter().map(move |f| (sheet.as_str(), f)))
        .filter(|&(sheet, field)| seen.insert((sheet, field.name.as_str())))
        .map(|(sheet, field)| DocumentationEntry {
            dataset: sheet.to_string(),
            field: field.name.clone(),
            declared_type: field.declared_type.clone(),
            nullable: field.nullability_label().to_string(),
            description: field.description_text().to_string(),
        })
        .collect();

    entries.sort_by(|a, b| a.dataset.cmp(&b.dataset).then_with(|| a.field.cmp(&b.field)));
    entries
}

/// Makes `name` a legal sheet name: forbidden characters become `_`,
/// surrounding apostrophes are dropped and the result is cut to 31
/// characters.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'');

    if cleaned.is_empty() {
        return "Sheet".to_string();
    }
    cleaned.chars().take(MAX_SHEET_NAME).collect()
}

fn unique_sheet_name(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_lowercase()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let suffix = format!(" ({})", n);
        let stem: String = base
            .chars()
            .take(MAX_SHEET_NAME - suffix.chars().count())
            .collect();
        let candidate = format!("{}{}", stem.trim_end(), suffix);
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

/// Serializes export jobs to `.xlsx` files.
#[derive(Debug, Clone)]
pub struct WorkbookWriter {
    theme: Theme,
    note_author: String,
}

impl Default for WorkbookWriter {
    fn default() -> Self {
        Self::new(Theme::Light)
    }
}

impl WorkbookWriter {
    pub fn new(theme: Theme) -> Self {
        Self {
            theme,
            note_author: "Field Reference".to_string(),
        }
    }

    /// Serializes `job` to an in-memory `.xlsx`.
    ///
    /// # Errors
    /// Returns [`ExportError::Write`] if serialization fails.
    pub fn to_bytes(&self, job: &ExportJob, path: &Path) -> Result<Vec<u8>> {
        let plan = WorkbookPlan::for_job(job);
        render::render(job, &plan, self.theme, &self.note_author)
            .map_err(|e| ExportError::write_failed(path, "cannot serialize workbook", e))
    }

    /// Writes `job` to `path`, replacing any existing file only on success.
    ///
    /// # Errors
    /// Returns [`ExportError::Write`] when serialization fails or the target
    /// directory is not writable.
    pub fn write(&self, job: &ExportJob, path: &Path) -> Result<()> {
        let bytes = self.to_bytes(job, path)?;
        debug!("Serialized workbook: {} bytes", bytes.len());
        replace_file(path, &bytes)?;
        info!(
            "Wrote {} dataset(s), {} row(s) to {}",
            job.datasets().len(),
            job.row_count(),
            path.display()
        );
        Ok(())
    }
}

/// Writes `bytes` to a temporary sibling of `path`, then renames it over
/// `path`.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".tdsexport-")
        .suffix(".xlsx.tmp")
        .tempfile_in(directory)
        .map_err(|e| ExportError::write_failed(path, "cannot create temporary file", e))?;

    temp.write_all(bytes)
        .map_err(|e| ExportError::write_failed(path, "cannot write temporary file", e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ExportError::write_failed(path, "cannot flush temporary file", e))?;

    temp.persist(path)
        .map_err(|e| ExportError::write_failed(path, "cannot replace target file", e.error))?;
    Ok(())
}
