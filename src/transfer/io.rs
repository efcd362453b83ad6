//! Table serialization (CSV and JSON) and import into a store.

use std::io::{Read, Write};
use std::str::FromStr;

use crate::errors::{CipherSafeError, Result};
use crate::vault::record::RecordUpdate;
use crate::vault::store::VaultStore;

use super::table::{import_table, SkippedRow, Table};

/// Spreadsheet file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Json,
}

impl FromStr for TableFormat {
    type Err = CipherSafeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(CipherSafeError::TransferError(format!(
                "unknown table format '{other}'; use 'csv' or 'json'"
            ))),
        }
    }
}

impl TableFormat {
    /// Guess from a file extension; CSV when unknown.
    pub fn detect(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Csv,
        }
    }
}

pub fn write_table<W: Write>(table: &Table, format: TableFormat, out: W) -> Result<()> {
    match format {
        TableFormat::Csv => write_csv(table, out),
        TableFormat::Json => serde_json::to_writer_pretty(out, table)
            .map_err(|e| CipherSafeError::TransferError(format!("JSON export: {e}"))),
    }
}

pub fn read_table<R: Read>(format: TableFormat, input: R) -> Result<Table> {
    match format {
        TableFormat::Csv => read_csv(input),
        TableFormat::Json => serde_json::from_reader(input)
            .map_err(|e| CipherSafeError::TransferError(format!("JSON import: {e}"))),
    }
}

fn write_csv<W: Write>(table: &Table, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&table.headers).map_err(csv_error)?;
    for row in &table.rows {
        writer.write_record(row).map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_csv<R: Read>(input: R) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(input);
    let headers = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { headers, rows })
}

fn csv_error(e: csv::Error) -> CipherSafeError {
    CipherSafeError::TransferError(format!("CSV: {e}"))
}

/// What an import did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Upsert every row of `table` into `store` by title.
///
/// A live record with the same title gets the row's non-empty cells;
/// otherwise a new record is created.  Changes are left uncommitted.
pub async fn import_into(store: &VaultStore, table: &Table) -> Result<ImportReport> {
    let plan = import_table(table)?;
    let mut report = ImportReport {
        skipped: plan.skipped,
        ..ImportReport::default()
    };

    for (_, new) in plan.records {
        match store.find_by_title(&new.title).await? {
            Some(existing) => {
                let mut update = RecordUpdate::new();
                for (name, value) in new.fields {
                    if existing.field(&name) != Some(value.as_str()) {
                        update = update.set_field(name, value);
                    }
                }
                if update.is_empty() {
                    report.unchanged += 1;
                } else {
                    store.update(existing.id, update).await?;
                    report.updated += 1;
                }
            }
            None => {
                store.create(new).await?;
                report.created += 1;
            }
        }
    }
    tracing::info!(
        created = report.created,
        updated = report.updated,
        skipped = report.skipped.len(),
        "import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table {
            headers: vec!["Account Name".into(), "Password".into(), "Notes".into()],
            rows: vec![vec!["Bank".into(), "p,w\"1".into(), "line1\nline2".into()]],
        }
    }

    #[test]
    fn csv_roundtrip_handles_quoting() {
        let mut buf = Vec::new();
        write_table(&table(), TableFormat::Csv, &mut buf).unwrap();
        assert_eq!(read_table(TableFormat::Csv, buf.as_slice()).unwrap(), table());
    }

    #[test]
    fn json_roundtrip() {
        let mut buf = Vec::new();
        write_table(&table(), TableFormat::Json, &mut buf).unwrap();
        assert_eq!(read_table(TableFormat::Json, buf.as_slice()).unwrap(), table());
    }

    #[test]
    fn short_csv_rows_are_accepted() {
        let input = "Account Name,Username,Password\nBank,alice\n";
        let t = read_table(TableFormat::Csv, input.as_bytes()).unwrap();
        assert_eq!(t.rows, vec![vec!["Bank".to_string(), "alice".to_string()]]);
    }

    #[test]
    fn format_parsing_and_detection() {
        assert_eq!("CSV".parse::<TableFormat>().unwrap(), TableFormat::Csv);
        assert!("xlsx".parse::<TableFormat>().is_err());
        assert_eq!(TableFormat::detect(std::path::Path::new("a.JSON")), TableFormat::Json);
        assert_eq!(TableFormat::detect(std::path::Path::new("a.txt")), TableFormat::Csv);
    }
}
