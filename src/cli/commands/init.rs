//! `ciphersafe init`: create a new vault.

use crate::cli::output;
use crate::cli::{log_audit, prompt_new_passphrase, Cli, Context, PASSPHRASE_ENV};
use crate::errors::{CipherSafeError, Result};
use crate::vault::session::Vault;

/// Execute the `init` command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;
    let vault_dir = ctx.vault_dir();
    let vault_path = ctx.vault_path();

    if !vault_dir.exists() {
        std::fs::create_dir_all(&vault_dir)?;
        output::info(&format!("Created vault directory: {}", vault_dir.display()));
    }

    if vault_path.exists() {
        output::tip("Use `ciphersafe add` to add credentials to the existing vault.");
        return Err(CipherSafeError::VaultAlreadyExists(vault_path));
    }

    let passphrase = prompt_new_passphrase(PASSPHRASE_ENV)?;
    let vault = Vault::create(
        ctx.persistence(),
        ctx.lockout()?,
        passphrase.as_bytes(),
        ctx.vault_options()?,
    )
    .await?;
    let status = vault.status().await;
    vault.lock().await;

    log_audit(&ctx, "create", None, Some(&format!("vault {}", status.vault_id)));
    output::success(&format!(
        "Vault '{}' created at {}",
        ctx.vault_name,
        vault_path.display()
    ));
    output::tip("Run `ciphersafe add <ACCOUNT>` to add a credential.");
    output::tip("Run `ciphersafe sync --remote <DIR>` to back it up to a synced folder.");

    Ok(())
}
