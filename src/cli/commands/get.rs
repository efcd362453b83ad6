//! `ciphersafe get`: show a single credential.

use crate::cli::output;
use crate::cli::{resolve_record, Cli, Context};
use crate::errors::Result;

/// Execute the `get` command.
pub async fn execute(cli: &Cli, key: &str, show: bool) -> Result<()> {
    let ctx = Context::load(cli)?;
    let vault = ctx.unlock().await?;

    let record = resolve_record(vault.store(), key).await?;
    output::print_record(&record, show);
    vault.lock().await;
    Ok(())
}
