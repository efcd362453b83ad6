//! `ciphersafe edit`: change a credential's title or fields.

use crate::cli::commands::add::read_password;
use crate::cli::output;
use crate::cli::{log_audit, parse_field_args, resolve_record, Cli, Context};
use crate::errors::Result;
use crate::vault::record::{RecordUpdate, FIELD_NOTES, FIELD_PASSWORD, FIELD_USERNAME};

/// What `ciphersafe edit` should change.
#[derive(Debug, Default)]
pub struct EditArgs<'a> {
    pub title: Option<&'a str>,
    pub username: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub password: bool,
    pub fields: &'a [String],
    pub remove: &'a [String],
}

/// Execute the `edit` command.
pub async fn execute(cli: &Cli, key: &str, args: EditArgs<'_>) -> Result<()> {
    let ctx = Context::load(cli)?;

    let mut update = RecordUpdate::new();
    if let Some(title) = args.title {
        update = update.title(title);
    }
    if let Some(username) = args.username {
        update = update.set_field(FIELD_USERNAME, username);
    }
    if let Some(notes) = args.notes {
        update = update.set_field(FIELD_NOTES, notes);
    }
    for (name, value) in parse_field_args(args.fields)? {
        update = update.set_field(name, value);
    }
    for name in args.remove {
        update = update.remove_field(name.as_str());
    }

    let vault = ctx.unlock().await?;
    let record = resolve_record(vault.store(), key).await?;
    if args.password {
        update = update.set_field(FIELD_PASSWORD, read_password(&record.title)?);
    }
    update.validate()?;

    let updated = vault.store().update(record.id, update).await?;
    let version = vault.store().commit().await?;
    vault.lock().await;

    log_audit(&ctx, "edit", Some(&updated.title), None);
    output::success(&format!(
        "Updated '{}' (revision {}, vault version {version})",
        updated.title, updated.revision
    ));
    Ok(())
}
