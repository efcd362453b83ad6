//! `ciphersafe passwd`: change the master passphrase.
//!
//! Re-wraps the same master key under the new passphrase, so records are
//! not re-encrypted and synced copies stay readable.

use crate::cli::output;
use crate::cli::{log_audit, prompt_new_passphrase, Cli, Context};
use crate::errors::Result;

/// Checked for the new passphrase before prompting.
pub const NEW_PASSPHRASE_ENV: &str = "CIPHERSAFE_NEW_PASSPHRASE";

/// Execute the `passwd` command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;

    output::info("Enter your current vault passphrase.");
    let vault = ctx.unlock().await?;

    output::info("Choose your new vault passphrase.");
    let new_passphrase = prompt_new_passphrase(NEW_PASSPHRASE_ENV)?;
    vault.change_passphrase(new_passphrase.as_bytes()).await?;
    vault.lock().await;

    log_audit(&ctx, "passwd", None, Some("passphrase slot re-wrapped"));
    output::success(&format!("Passphrase changed for vault '{}'", ctx.vault_name));
    output::tip("Other devices pick up the new passphrase on their next sync.");
    Ok(())
}
