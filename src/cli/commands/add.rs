//! `ciphersafe add`: store a new credential.

use std::io::{self, IsTerminal, Read};

use crate::cli::output;
use crate::cli::{log_audit, parse_field_args, Cli, Context};
use crate::errors::{CipherSafeError, Result};
use crate::vault::record::{NewRecord, FIELD_NOTES, FIELD_PASSWORD, FIELD_USERNAME};

/// Execute the `add` command.
pub async fn execute(
    cli: &Cli,
    title: &str,
    username: Option<&str>,
    notes: Option<&str>,
    fields: &[String],
    no_password: bool,
) -> Result<()> {
    let ctx = Context::load(cli)?;

    let mut new = NewRecord::new(title);
    if let Some(username) = username {
        new = new.field(FIELD_USERNAME, username);
    }
    if let Some(notes) = notes {
        new = new.field(FIELD_NOTES, notes);
    }
    for (name, value) in parse_field_args(fields)? {
        new = new.field(name, value);
    }
    new.validate()?;

    let vault = ctx.unlock().await?;
    if vault.store().find_by_title(title).await?.is_some() {
        return Err(CipherSafeError::CommandFailed(format!(
            "a record titled '{title}' already exists; use `ciphersafe edit`"
        )));
    }

    if !no_password {
        let password = read_password(title)?;
        if !password.is_empty() {
            new = new.field(FIELD_PASSWORD, password);
        }
    }

    let record = vault.store().create(new).await?;
    let version = vault.store().commit().await?;
    vault.lock().await;

    log_audit(&ctx, "add", Some(&record.title), None);
    output::success(&format!(
        "Added '{}' to vault '{}' (version {version})",
        record.title, ctx.vault_name
    ));
    Ok(())
}

/// Password from piped stdin, or an interactive secure prompt.
pub(crate) fn read_password(title: &str) -> Result<String> {
    if io::stdin().is_terminal() {
        dialoguer::Password::new()
            .with_prompt(format!("Password for {title}"))
            .allow_empty_password(true)
            .interact()
            .map_err(|e| CipherSafeError::CommandFailed(format!("input prompt: {e}")))
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }
}
