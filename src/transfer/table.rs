//! Records ⇄ flat table.
//!
//! Column layout: `Account Name`, `Username`, `Password`, `Notes`, then
//! every other secret field name in sorted order.  Pure transformation:
//! no cryptography, no persistence.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::{CipherSafeError, Result};
use crate::vault::record::{
    CredentialRecord, NewRecord, FIELD_NOTES, FIELD_PASSWORD, FIELD_USERNAME,
};

pub const COL_ACCOUNT: &str = "Account Name";
pub const COL_USERNAME: &str = "Username";
pub const COL_PASSWORD: &str = "Password";
pub const COL_NOTES: &str = "Notes";

/// Standard columns and the record field each maps to.
const STANDARD_COLUMNS: [(&str, &str); 3] = [
    (COL_USERNAME, FIELD_USERNAME),
    (COL_PASSWORD, FIELD_PASSWORD),
    (COL_NOTES, FIELD_NOTES),
];

/// Headers plus string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based data row number (the header row is not counted).
    pub row: usize,
    pub reason: String,
}

/// Parsed import input.
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub records: Vec<(usize, NewRecord)>,
    pub skipped: Vec<SkippedRow>,
}

/// Flatten live records into a table, ordered by title.
pub fn export_table(records: &[CredentialRecord]) -> Table {
    let mut live: Vec<&CredentialRecord> = records.iter().filter(|r| !r.deleted).collect();
    live.sort_by(|a, b| {
        a.title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then(a.id.cmp(&b.id))
    });

    let standard: BTreeSet<&str> = STANDARD_COLUMNS.iter().map(|(_, f)| *f).collect();
    let extra: BTreeSet<&str> = live
        .iter()
        .flat_map(|r| r.fields.keys())
        .map(String::as_str)
        .filter(|name| !standard.contains(name))
        .collect();

    let mut headers = vec![COL_ACCOUNT.to_string()];
    headers.extend(STANDARD_COLUMNS.iter().map(|(col, _)| (*col).to_string()));
    headers.extend(extra.iter().map(|name| (*name).to_string()));

    let rows = live
        .iter()
        .map(|record| {
            let mut row = vec![record.title.clone()];
            row.extend(
                STANDARD_COLUMNS
                    .iter()
                    .map(|(_, field)| record.field(field).unwrap_or_default().to_string()),
            );
            row.extend(
                extra
                    .iter()
                    .map(|name| record.field(name).unwrap_or_default().to_string()),
            );
            row
        })
        .collect();

    Table { headers, rows }
}

/// Turn a table into record inputs.
///
/// The `Account Name` column is required.  Standard headers match
/// case-insensitively; any other header becomes a field name.  Empty cells
/// are ignored.  Rows without an account name, or whose fields fail
/// validation, are reported in `skipped`.
pub fn import_table(table: &Table) -> Result<ImportPlan> {
    let columns: Vec<Column> = table.headers.iter().map(|h| Column::from_header(h)).collect();
    if !columns.iter().any(|c| matches!(c, Column::Title)) {
        return Err(CipherSafeError::TransferError(format!(
            "missing required column '{COL_ACCOUNT}'"
        )));
    }

    let mut plan = ImportPlan::default();
    for (index, row) in table.rows.iter().enumerate() {
        let number = index + 1;
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let mut title = String::new();
        let mut fields = BTreeMap::new();
        for (column, cell) in columns.iter().zip(row) {
            if cell.is_empty() {
                continue;
            }
            match column {
                Column::Title => title = cell.trim().to_string(),
                Column::Field(name) => {
                    fields.insert(name.clone(), cell.clone());
                }
                Column::Ignored => {}
            }
        }

        if title.is_empty() {
            plan.skipped.push(SkippedRow {
                row: number,
                reason: format!("missing {COL_ACCOUNT}"),
            });
            continue;
        }
        let new = NewRecord { title, fields };
        match new.validate() {
            Ok(()) => plan.records.push((number, new)),
            Err(e) => plan.skipped.push(SkippedRow {
                row: number,
                reason: e.to_string(),
            }),
        }
    }
    Ok(plan)
}

enum Column {
    Title,
    Field(String),
    Ignored,
}

impl Column {
    fn from_header(header: &str) -> Self {
        let trimmed = header.trim();
        if trimmed.is_empty() {
            return Self::Ignored;
        }
        if trimmed.eq_ignore_ascii_case(COL_ACCOUNT) {
            return Self::Title;
        }
        STANDARD_COLUMNS
            .iter()
            .find(|(col, _)| trimmed.eq_ignore_ascii_case(col))
            .map_or_else(
                || Self::Field(trimmed.to_string()),
                |(_, field)| Self::Field((*field).to_string()),
            )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn record(title: &str, fields: &[(&str, &str)]) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            id: Uuid::new_v4(),
            title: title.into(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            created_at: now,
            updated_at: now,
            deleted: false,
            revision: 1,
            origin: "a".into(),
            conflict_of: None,
        }
    }

    #[test]
    fn export_uses_standard_then_sorted_extra_columns() {
        let mut gone = record("Deleted", &[]);
        gone.deleted = true;
        let table = export_table(&[
            record("mail", &[("username", "bob"), ("pin", "1234")]),
            record("Bank", &[("password", "s3cr3t"), ("answer", "blue")]),
            gone,
        ]);

        assert_eq!(
            table.headers,
            vec!["Account Name", "Username", "Password", "Notes", "answer", "pin"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["Bank", "", "s3cr3t", "", "blue", ""]);
        assert_eq!(table.rows[1], vec!["mail", "bob", "", "", "", "1234"]);
    }

    #[test]
    fn import_maps_headers_and_reports_bad_rows() {
        let table = Table {
            headers: vec!["account name".into(), "PASSWORD".into(), "pin".into()],
            rows: vec![
                vec!["Bank".into(), "s3cr3t".into(), "".into()],
                vec!["".into(), "orphan".into(), "".into()],
                vec!["".into(), "".into(), "".into()],
                vec!["Phone".into()],
            ],
        };
        let plan = import_table(&table).unwrap();

        assert_eq!(plan.records.len(), 2);
        let (row, bank) = &plan.records[0];
        assert_eq!(*row, 1);
        assert_eq!(bank.fields.get("password").map(String::as_str), Some("s3cr3t"));
        assert!(!bank.fields.contains_key("pin"));
        assert_eq!(plan.records[1].1.title, "Phone");

        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].row, 2);
    }

    #[test]
    fn import_requires_account_column() {
        let table = Table {
            headers: vec!["Password".into()],
            rows: vec![],
        };
        assert!(matches!(
            import_table(&table),
            Err(CipherSafeError::TransferError(_))
        ));
    }

    #[test]
    fn export_then_import_preserves_fields() {
        let original = record("Bank", &[("username", "alice"), ("Security Q", "blue")]);
        let plan = import_table(&export_table(&[original.clone()])).unwrap();
        assert_eq!(plan.records[0].1.title, original.title);
        assert_eq!(plan.records[0].1.fields, original.fields);
    }
}
