//! `ciphersafe delete`: tombstone a credential.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{log_audit, resolve_record, Cli, Context};
use crate::errors::{CipherSafeError, Result};

/// Execute the `delete` command.
pub async fn execute(cli: &Cli, key: &str, force: bool) -> Result<()> {
    let ctx = Context::load(cli)?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete '{key}'?"))
            .default(false)
            .interact()
            .map_err(|e| CipherSafeError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    let vault = ctx.unlock().await?;
    let record = resolve_record(vault.store(), key).await?;
    vault.store().delete(record.id).await?;
    vault.store().commit().await?;
    vault.lock().await;

    log_audit(&ctx, "delete", Some(&record.title), None);
    output::success(&format!("Deleted '{}'", record.title));
    output::tip("The deletion reaches other devices on the next sync.");
    Ok(())
}
