//! Spreadsheet export/import.
//!
//! Works only on decrypted in-memory records, so every entry point needs an
//! unlocked store.

pub mod io;
pub mod protect;
pub mod table;

pub use io::{import_into, read_table, write_table, ImportReport, TableFormat};
pub use protect::{is_protected, protect, unprotect};
pub use table::{export_table, import_table, ImportPlan, SkippedRow, Table};

use crate::errors::Result;
use crate::vault::record::RecordFilter;
use crate::vault::store::VaultStore;

/// Export every live record of `store`.
pub async fn export_store(store: &VaultStore) -> Result<Table> {
    let records = store.list(&RecordFilter::all()).await?;
    Ok(export_table(&records))
}
