//! Property tests for dataset alignment and documentation uniqueness.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use std::collections::HashSet;
use tdsexport_core::clean::CleaningRules;
use tdsexport_core::engine::merge_fields;
use tdsexport_core::source::{ResultColumn, ResultSet};
use tdsexport_core::workbook::{WorkbookPlan, documentation_entries};
use tdsexport_core::{CellValue, Dataset, ExportJob};

fn cell() -> impl Strategy<Value = CellValue> {
    prop_oneof![
        Just(CellValue::Null),
        any::<i64>().prop_map(CellValue::Integer),
        (-1.0e9f64..1.0e9).prop_map(CellValue::Float),
        any::<bool>().prop_map(CellValue::Bool),
        "[a-zA-Z0 ]{0,8}".prop_map(CellValue::Text),
    ]
}

/// Column names drawn from a small alphabet so duplicates are common.
fn column_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop_oneof![Just("id"), Just("Id"), Just("name"), Just("RecID"), Just("total")], 1..8)
        .prop_map(|names| names.into_iter().map(String::from).collect())
}

fn result_set() -> impl Strategy<Value = ResultSet> {
    column_names().prop_flat_map(|names| {
        let width = names.len();
        prop::collection::vec(prop::collection::vec(cell(), width), 0..6).prop_map(move |rows| {
            ResultSet {
                columns: names.iter().map(|n| ResultColumn::new(n.as_str(), "int")).collect(),
                rows,
            }
        })
    })
}

proptest! {
    #[test]
    fn prop_cleaning_preserves_alignment(result in result_set(), drop_empty in any::<bool>()) {
        let rules = CleaningRules {
            omit_patterns: vec!["(?i)recid".to_string()],
            drop_empty_columns: drop_empty,
            date_format: Some("%m/%d/%Y".to_string()),
            ..CleaningRules::default()
        };
        let row_count = result.rows.len();
        let cleaned = rules.compile().unwrap().apply(result);

        prop_assert_eq!(cleaned.rows.len(), row_count);
        for row in &cleaned.rows {
            prop_assert_eq!(row.len(), cleaned.columns.len());
        }
        prop_assert!(cleaned.columns.iter().all(|c| c.name != "RecID"));
    }

    #[test]
    fn prop_merged_datasets_have_unique_fields_and_aligned_rows(result in result_set()) {
        let fields = merge_fields(&result.columns, &[], &Default::default(), &Default::default());
        let names: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        prop_assert_eq!(names.len(), fields.len());

        let dataset = Dataset::new("Data", fields, result.rows).unwrap();
        for row in dataset.rows() {
            prop_assert_eq!(row.len(), dataset.fields().len());
        }
    }

    #[test]
    fn prop_ragged_rows_rejected(width in 1usize..6, extra in 1usize..3) {
        let fields = (0..width)
            .map(|i| tdsexport_core::FieldDescriptor::new(format!("c{i}"), "int"))
            .collect();
        let rows = vec![vec![CellValue::Null; width], vec![CellValue::Null; width + extra]];
        prop_assert!(Dataset::new("Ragged", fields, rows).is_err());
    }

    #[test]
    fn prop_documentation_has_one_entry_per_field(
        sets in prop::collection::vec(result_set(), 1..5),
        names in prop::collection::vec("[A-Ca-c]{1,3}", 1..5),
    ) {
        let mut job = ExportJob::new("out.xlsx");
        for (result, name) in sets.into_iter().zip(names) {
            let fields = merge_fields(&result.columns, &[], &Default::default(), &Default::default());
            job.push(Dataset::new(name, fields, result.rows).unwrap());
        }

        let plan = WorkbookPlan::for_job(&job);
        let expected: HashSet<(String, String)> = job
            .datasets()
            .iter()
            .zip(&plan.sheet_names)
            .flat_map(|(d, sheet)| d.fields().iter().map(move |f| (sheet.clone(), f.name.clone())))
            .collect();

        let entries = documentation_entries(&job);
        let keys: HashSet<(String, String)> = entries
            .iter()
            .map(|e| (e.dataset.clone(), e.field.clone()))
            .collect();
        prop_assert_eq!(keys.len(), entries.len());
        prop_assert_eq!(keys, expected);

        let sorted = entries.windows(2).all(|w| {
            (w[0].dataset.as_str(), w[0].field.as_str()) <= (w[1].dataset.as_str(), w[1].field.as_str())
        });
        prop_assert!(sorted);

        let sheets: HashSet<String> = plan.sheet_names.iter().map(|s| s.to_lowercase()).collect();
        prop_assert_eq!(sheets.len(), job.datasets().len());
    }
}
