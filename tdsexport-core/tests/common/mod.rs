//! Shared fixtures for integration tests.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx, open_workbook};
use std::path::Path;
use tdsexport_core::source::{DataSource, ResultColumn, ResultSet, SourceError};
use tdsexport_core::CellValue;

enum Reply {
    Rows(ResultSet),
    Fail(String),
}

/// In-memory data source answering by SQL fragment and first parameter.
#[derive(Default)]
pub struct MemorySource {
    replies: Vec<(String, Option<String>, Reply)>,
    /// Every statement run, with its parameters
    pub executed: Vec<(String, Vec<String>)>,
    pub closed: bool,
}

impl MemorySource {
    pub fn on(mut self, fragment: &str, result: ResultSet) -> Self {
        self.replies
            .push((fragment.to_string(), None, Reply::Rows(result)));
        self
    }

    pub fn on_table(mut self, table: &str, result: ResultSet) -> Self {
        self.replies.push((
            "INFORMATION_SCHEMA.COLUMNS".to_string(),
            Some(table.to_string()),
            Reply::Rows(result),
        ));
        self
    }

    pub fn failing(mut self, fragment: &str, message: &str) -> Self {
        self.replies
            .push((fragment.to_string(), None, Reply::Fail(message.to_string())));
        self
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<ResultSet, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        self.executed.push((
            sql.to_string(),
            params.iter().map(ToString::to_string).collect(),
        ));

        let reply = self.replies.iter().find(|(fragment, param, _)| {
            sql.contains(fragment.as_str())
                && param
                    .as_deref()
                    .is_none_or(|p| params.first().copied() == Some(p))
        });
        match reply.map(|(_, _, reply)| reply) {
            Some(Reply::Rows(result)) => Ok(result.clone()),
            Some(Reply::Fail(message)) => Err(SourceError::Message(message.clone())),
            None => Ok(ResultSet::default()),
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.closed = true;
        Ok(())
    }
}

pub fn text(value: &str) -> CellValue {
    CellValue::Text(value.to_string())
}

pub fn result(columns: &[(&str, &str)], rows: Vec<Vec<CellValue>>) -> ResultSet {
    ResultSet {
        columns: columns
            .iter()
            .map(|(name, ty)| ResultColumn::new(*name, *ty))
            .collect(),
        rows,
    }
}

/// Catalog result rows in the introspector's column order.
pub fn catalog(columns: &[(&str, &str, bool, Option<&str>)]) -> ResultSet {
    let rows = columns
        .iter()
        .map(|(name, ty, nullable, description)| {
            vec![
                text("dbo"),
                text(name),
                text(ty),
                CellValue::Null,
                CellValue::Null,
                CellValue::Null,
                text(if *nullable { "YES" } else { "NO" }),
                description.map_or(CellValue::Null, text),
            ]
        })
        .collect();
    ResultSet {
        columns: Vec::new(),
        rows,
    }
}

/// Source holding the Customers/Orders fixture. `total` has no description.
pub fn customers_and_orders() -> MemorySource {
    MemorySource::default()
        .on(
            "FROM Customers",
            result(
                &[("id", "int"), ("name", "nvarchar")],
                vec![
                    vec![CellValue::Integer(1), text("Ada Lovelace")],
                    vec![CellValue::Integer(2), text("Grace Hopper")],
                ],
            ),
        )
        .on(
            "FROM Orders",
            result(
                &[("id", "int"), ("customer_id", "int"), ("total", "money")],
                vec![
                    vec![CellValue::Integer(10), CellValue::Integer(1), CellValue::Float(99.5)],
                    vec![CellValue::Integer(11), CellValue::Integer(2), CellValue::Float(12.25)],
                    vec![CellValue::Integer(12), CellValue::Integer(1), CellValue::Null],
                ],
            ),
        )
        .on_table(
            "Customers",
            catalog(&[
                ("id", "int", false, Some("Customer id")),
                ("name", "nvarchar", false, Some("Customer display name")),
            ]),
        )
        .on_table(
            "Orders",
            catalog(&[
                ("id", "int", false, Some("Order id")),
                ("customer_id", "int", false, Some("Owning customer")),
                ("total", "money", true, None),
            ]),
        )
}

/// Reads every sheet of a workbook as rows of display strings.
pub fn read_sheet(path: &Path, sheet: &str) -> Vec<Vec<String>> {
    let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
    let range = workbook.worksheet_range(sheet).unwrap();
    range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect()
}

pub fn sheet_names(path: &Path) -> Vec<String> {
    let workbook: Xlsx<_> = open_workbook(path).unwrap();
    workbook.sheet_names()
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
