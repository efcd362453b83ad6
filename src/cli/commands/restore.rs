//! `ciphersafe restore`: bootstrap this device from the remote copy.

use crate::cli::output;
use crate::cli::{log_audit, Cli, Context};
use crate::errors::{CipherSafeError, Result};

/// Execute the `restore` command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;
    let path = ctx.vault_path();
    if path.exists() {
        output::tip("Use `ciphersafe sync` to update an existing vault.");
        return Err(CipherSafeError::VaultAlreadyExists(path));
    }

    let engine = ctx.sync_engine()?;
    let vault = engine
        .restore_from_remote(ctx.persistence(), ctx.lockout()?, ctx.vault_options()?)
        .await?;
    let status = vault.status().await;

    log_audit(&ctx, "restore", None, Some(&format!("version {}", status.version)));
    output::success(&format!(
        "Restored vault '{}' (version {}) to {}",
        ctx.vault_name,
        status.version,
        path.display()
    ));
    output::tip("Unlock it with the passphrase last used on the device that uploaded it.");
    Ok(())
}
