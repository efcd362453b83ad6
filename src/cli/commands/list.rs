//! `ciphersafe list`: display credentials in a table.

use crate::cli::output;
use crate::cli::{Cli, Context};
use crate::errors::Result;
use crate::vault::record::RecordFilter;

/// Execute the `list` command.
pub async fn execute(cli: &Cli, search: Option<&str>, conflicts: bool, all: bool) -> Result<()> {
    let ctx = Context::load(cli)?;
    let vault = ctx.unlock().await?;

    let filter = RecordFilter {
        title_contains: search.map(str::to_string),
        conflicts_only: conflicts,
        include_deleted: all,
    };
    let records = vault.store().list(&filter).await?;
    vault.lock().await;

    output::info(&format!("vault '{}': {} record(s)", ctx.vault_name, records.len()));
    output::print_records_table(&records);
    Ok(())
}
