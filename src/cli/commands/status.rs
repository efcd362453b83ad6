//! `ciphersafe status`: show where the vault is and what state it is in.

use console::style;

use crate::cli::output;
use crate::cli::{Cli, Context, PASSPHRASE_ENV};
use crate::errors::Result;
use crate::unlock::machine::UnlockState;

/// Execute the `status` command.
///
/// Record counts are shown only when a passphrase is available from the
/// environment; otherwise the vault stays locked.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;
    let vault = if std::env::var_os(PASSPHRASE_ENV).is_some() {
        ctx.unlock().await?
    } else {
        ctx.open_vault().await?
    };
    let status = vault.status().await;
    vault.lock().await;

    let state = match status.state {
        UnlockState::Locked => "locked".to_string(),
        UnlockState::Unlocking => "unlocking".to_string(),
        UnlockState::Unlocked => "unlocked".to_string(),
        UnlockState::LockedOut { until } => {
            format!("locked out until {}", until.format("%Y-%m-%d %H:%M:%S UTC"))
        }
        UnlockState::Wiped => "wiped".to_string(),
    };

    println!("{}", style(format!("Vault '{}'", ctx.vault_name)).bold());
    println!("  location:        {}", status.location);
    println!("  id:              {}", status.vault_id);
    println!("  version:         {}", status.version);
    println!("  sync rounds:     {}", status.sync_round);
    println!("  state:           {state}");
    println!("  failed unlocks:  {}", status.failed_attempts);
    println!(
        "  biometric:       {}",
        if status.biometric_enrolled { "enrolled" } else { "not enrolled" }
    );
    if let Some(counts) = status.counts {
        println!("  records:         {}", counts.live);
        println!("  deleted:         {}", counts.tombstones);
        println!("  conflict copies: {}", counts.conflicts);
    }
    match ctx.settings.remote_dir(&ctx.project_dir) {
        Some(remote) => println!("  remote:          {}", remote.display()),
        None => output::tip("No remote configured; pass --remote <DIR> to enable sync."),
    }
    Ok(())
}
