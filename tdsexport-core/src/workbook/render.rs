//! `.xlsx` serialization with rust_xlsxwriter.

use super::{DOCUMENTATION_SHEET, WorkbookPlan};
use crate::models::{CellValue, Dataset, ExportJob};
use crate::theme::Theme;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_xlsxwriter::{
    Color, ExcelDateTime, Format, FormatAlign, FormatBorder, Note, Workbook, Worksheet, XlsxError,
};
use thiserror::Error;
use tracing::warn;

/// Largest integer magnitude a spreadsheet number holds exactly (2^53).
const MAX_EXACT_INTEGER: i64 = 1 << 53;

/// Excel's per-cell text limit.
const MAX_CELL_TEXT: usize = 32_767;

const DOCUMENTATION_HEADERS: [&str; 5] = ["Dataset", "Field", "Type", "Nullable", "Description"];

#[derive(Debug, Error)]
pub(super) enum RenderError {
    #[error(transparent)]
    Xlsx(#[from] XlsxError),

    #[error("sheet '{sheet}' has {count} columns, more than a worksheet holds")]
    TooManyColumns { sheet: String, count: usize },

    #[error("sheet '{sheet}' has more rows than a worksheet holds")]
    TooManyRows { sheet: String },
}

struct Formats {
    header: Format,
    body: Option<Format>,
    date: Format,
    datetime: Format,
    time: Format,
}

impl Formats {
    fn for_theme(theme: Theme) -> Self {
        let palette = theme.palette();
        let header_text = match theme {
            Theme::Light => palette.entry,
            Theme::Dark => palette.foreground,
        };
        let header = Format::new()
            .set_bold()
            .set_background_color(Color::RGB(palette.accent))
            .set_font_color(Color::RGB(header_text))
            .set_align(FormatAlign::Center)
            .set_border(FormatBorder::Thin);

        let base = match theme {
            Theme::Light => Format::new(),
            Theme::Dark => Format::new()
                .set_background_color(Color::RGB(palette.entry))
                .set_font_color(Color::RGB(palette.foreground)),
        };

        Self {
            header,
            body: matches!(theme, Theme::Dark).then(|| base.clone()),
            date: base.clone().set_num_format("yyyy-mm-dd"),
            datetime: base.clone().set_num_format("yyyy-mm-dd hh:mm:ss"),
            time: base.set_num_format("hh:mm:ss"),
        }
    }
}

pub(super) fn render(
    job: &ExportJob,
    plan: &WorkbookPlan,
    theme: Theme,
    note_author: &str,
) -> Result<Vec<u8>, RenderError> {
    let formats = Formats::for_theme(theme);
    let mut workbook = Workbook::new();

    for (dataset, sheet_name) in job.datasets().iter().zip(&plan.sheet_names) {
        let worksheet = workbook.add_worksheet().set_name(sheet_name)?;
        write_dataset(worksheet, sheet_name, dataset, &formats, note_author)?;
    }

    let worksheet = workbook.add_worksheet().set_name(DOCUMENTATION_SHEET)?;
    for (col, header) in (0u16..).zip(DOCUMENTATION_HEADERS) {
        worksheet.write_string_with_format(0, col, header, &formats.header)?;
    }
    for (index, entry) in plan.documentation.iter().enumerate() {
        let row = row_number(index, DOCUMENTATION_SHEET)?;
        let values = [
            &entry.dataset,
            &entry.field,
            &entry.declared_type,
            &entry.nullable,
            &entry.description,
        ];
        for (col, value) in (0u16..).zip(values) {
            write_text(worksheet, row, col, value, formats.body.as_ref())?;
        }
    }
    worksheet.set_freeze_panes(1, 0)?;
    worksheet.autofit();

    Ok(workbook.save_to_buffer()?)
}

fn write_dataset(
    worksheet: &mut Worksheet,
    sheet_name: &str,
    dataset: &Dataset,
    formats: &Formats,
    note_author: &str,
) -> Result<(), RenderError> {
    let too_wide = || RenderError::TooManyColumns {
        sheet: sheet_name.to_string(),
        count: dataset.fields().len(),
    };

    for (index, field) in dataset.fields().iter().enumerate() {
        let col = u16::try_from(index).map_err(|_| too_wide())?;
        worksheet.write_string_with_format(0, col, &field.name, &formats.header)?;

        if let Some(description) = &field.description {
            let note = Note::new(description).set_author(note_author);
            worksheet.insert_note(0, col, &note)?;
        }
    }

    for (index, values) in dataset.rows().iter().enumerate() {
        let row = row_number(index, sheet_name)?;
        for (col, value) in values.iter().enumerate() {
            let col = u16::try_from(col).map_err(|_| too_wide())?;
            write_cell(worksheet, row, col, value, formats)?;
        }
    }

    worksheet.set_freeze_panes(1, 0)?;
    worksheet.autofit();
    Ok(())
}

/// Data row index to worksheet row, leaving row 0 for the header.
fn row_number(index: usize, sheet: &str) -> Result<u32, RenderError> {
    u32::try_from(index + 1).map_err(|_| RenderError::TooManyRows {
        sheet: sheet.to_string(),
    })
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &CellValue,
    formats: &Formats,
) -> Result<(), XlsxError> {
    let body = formats.body.as_ref();
    match value {
        CellValue::Null => {
            if let Some(format) = body {
                worksheet.write_blank(row, col, format)?;
            }
        }
        CellValue::Text(text) => write_text(worksheet, row, col, text, body)?,
        CellValue::Integer(v) if v.unsigned_abs() <= MAX_EXACT_INTEGER.unsigned_abs() => {
            #[allow(clippy::cast_precision_loss)]
            write_number(worksheet, row, col, *v as f64, body)?;
        }
        CellValue::Integer(v) => write_text(worksheet, row, col, &v.to_string(), body)?,
        CellValue::Float(v) if v.is_finite() => write_number(worksheet, row, col, *v, body)?,
        CellValue::Float(v) => write_text(worksheet, row, col, &v.to_string(), body)?,
        CellValue::Bool(v) => match body {
            Some(format) => {
                worksheet.write_boolean_with_format(row, col, *v, format)?;
            }
            None => {
                worksheet.write_boolean(row, col, *v)?;
            }
        },
        CellValue::Date(d) => match excel_date(*d) {
            Some(dt) => {
                worksheet.write_datetime_with_format(row, col, &dt, &formats.date)?;
            }
            None => write_text(worksheet, row, col, &value.to_string(), body)?,
        },
        CellValue::DateTime(d) => match excel_datetime(*d) {
            Some(dt) => {
                worksheet.write_datetime_with_format(row, col, &dt, &formats.datetime)?;
            }
            None => write_text(worksheet, row, col, &value.to_string(), body)?,
        },
        CellValue::Time(t) => match excel_time(*t) {
            Some(dt) => {
                worksheet.write_datetime_with_format(row, col, &dt, &formats.time)?;
            }
            None => write_text(worksheet, row, col, &value.to_string(), body)?,
        },
    }
    Ok(())
}

fn write_text(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    text: &str,
    format: Option<&Format>,
) -> Result<(), XlsxError> {
    let text = if text.chars().count() > MAX_CELL_TEXT {
        warn!("Truncating text at row {} column {} to {} characters", row, col, MAX_CELL_TEXT);
        text.chars().take(MAX_CELL_TEXT).collect::<String>()
    } else {
        text.to_string()
    };
    match format {
        Some(format) => worksheet.write_string_with_format(row, col, text, format)?,
        None => worksheet.write_string(row, col, text)?,
    };
    Ok(())
}

fn write_number(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: f64,
    format: Option<&Format>,
) -> Result<(), XlsxError> {
    match format {
        Some(format) => worksheet.write_number_with_format(row, col, value, format)?,
        None => worksheet.write_number(row, col, value)?,
    };
    Ok(())
}

/// Dates before 1900 have no spreadsheet serial; callers fall back to text.
fn excel_date(date: NaiveDate) -> Option<ExcelDateTime> {
    ExcelDateTime::from_ymd(
        u16::try_from(date.year()).ok()?,
        u8::try_from(date.month()).ok()?,
        u8::try_from(date.day()).ok()?,
    )
    .ok()
}

fn excel_datetime(value: NaiveDateTime) -> Option<ExcelDateTime> {
    let time = value.time();
    excel_date(value.date())?
        .and_hms(
            u16::try_from(time.hour()).ok()?,
            u8::try_from(time.minute()).ok()?,
            seconds(time),
        )
        .ok()
}

fn excel_time(time: NaiveTime) -> Option<ExcelDateTime> {
    ExcelDateTime::from_hms(
        u16::try_from(time.hour()).ok()?,
        u8::try_from(time.minute()).ok()?,
        seconds(time),
    )
    .ok()
}

fn seconds(time: NaiveTime) -> f64 {
    // Leap seconds report nanos >= 1e9; clamp into the same second.
    let nanos = time.nanosecond().min(999_999_999);
    f64::from(time.second()) + f64::from(nanos) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excel_date_conversion() {
        assert!(excel_date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()).is_some());
        assert!(excel_date(NaiveDate::from_ymd_opt(1753, 1, 1).unwrap()).is_none());
    }

    #[test]
    fn test_seconds_includes_fraction() {
        let t = NaiveTime::from_hms_milli_opt(10, 15, 30, 500).unwrap();
        assert!((seconds(t) - 30.5).abs() < 1e-9);
    }

    #[test]
    fn test_large_integer_threshold() {
        assert_eq!(MAX_EXACT_INTEGER, 9_007_199_254_740_992);
    }
}
