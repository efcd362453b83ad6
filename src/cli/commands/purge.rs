//! `ciphersafe purge`: drop tombstones that have survived a sync round.

use crate::cli::output;
use crate::cli::{log_audit, Cli, Context};
use crate::errors::Result;

/// Execute the `purge` command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;
    let vault = ctx.unlock().await?;

    let round = vault.store().header().await.sync.sync_round;
    let purged = vault.store().purge_tombstones(round).await?;
    if purged > 0 {
        vault.store().commit().await?;
    }
    vault.lock().await;

    if purged == 0 {
        output::info("Nothing to purge.");
        output::tip("Deleted records become purgeable after the next sync.");
    } else {
        log_audit(&ctx, "purge", None, Some(&format!("{purged} tombstones")));
        output::success(&format!("Purged {purged} deleted record(s)"));
    }
    Ok(())
}
