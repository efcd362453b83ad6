//! `ciphersafe wipe`: destroy the vault on this device.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{log_audit, Cli, Context};
use crate::errors::{CipherSafeError, Result};

/// Execute the `wipe` command.
pub async fn execute(cli: &Cli, force: bool) -> Result<()> {
    let ctx = Context::load(cli)?;
    let vault = ctx.open_vault().await?;

    if !force {
        output::warning("This permanently deletes the vault and its lockout state on this device.");
        let confirmed = Confirm::new()
            .with_prompt(format!("Wipe vault '{}'?", ctx.vault_name))
            .default(false)
            .interact()
            .map_err(|e| CipherSafeError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    vault.wipe().await?;
    log_audit(&ctx, "wipe", None, None);
    output::success(&format!("Vault '{}' wiped", ctx.vault_name));
    Ok(())
}
