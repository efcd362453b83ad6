//! `ciphersafe import`: upsert credentials from a spreadsheet.
//!
//! Password-protected exports are recognised by their magic bytes and
//! opened with the export password before parsing.

use std::path::Path;

use crate::cli::output;
use crate::cli::{log_audit, prompt_export_password, Cli, Context};
use crate::errors::{CipherSafeError, Result};
use crate::transfer::{import_into, is_protected, read_table, unprotect, TableFormat};

/// Execute the `import` command.
pub async fn execute(cli: &Cli, file: &str, format: Option<&str>) -> Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        return Err(CipherSafeError::CommandFailed(format!(
            "import file not found: {file}"
        )));
    }
    let format = match format {
        Some(f) => f.parse::<TableFormat>()?,
        None => TableFormat::detect(path),
    };
    let data = std::fs::read(path)?;
    let table = if is_protected(&data) {
        let password = prompt_export_password(false)?;
        let plain = unprotect(&data, password.as_bytes()).map_err(|e| match e {
            CipherSafeError::AuthenticationFailure => {
                CipherSafeError::CommandFailed("wrong export password".into())
            }
            other => other,
        })?;
        read_table(format, plain.as_slice())?
    } else {
        read_table(format, data.as_slice())?
    };

    let ctx = Context::load(cli)?;
    let vault = ctx.unlock().await?;
    let report = import_into(vault.store(), &table).await?;
    let version = vault.store().commit().await?;
    vault.lock().await;

    for skipped in &report.skipped {
        output::warning(&format!("row {} skipped: {}", skipped.row, skipped.reason));
    }
    log_audit(
        &ctx,
        "import",
        None,
        Some(&format!(
            "{} created, {} updated, {} skipped from {file}",
            report.created,
            report.updated,
            report.skipped.len()
        )),
    );
    output::success(&format!(
        "Imported {file}: {} created, {} updated, {} unchanged (version {version})",
        report.created, report.updated, report.unchanged
    ));
    Ok(())
}
