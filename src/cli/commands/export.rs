//! `ciphersafe export`: write credentials as a spreadsheet.
//!
//! Columns: `Account Name`, `Username`, `Password`, `Notes`, then any
//! extra field names.  Formats: `csv` (default) or `json`.  With
//! `--protect` the file is sealed under a separate export password.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use zeroize::Zeroizing;

use crate::cli::output;
use crate::cli::{log_audit, prompt_export_password, Cli, Context};
use crate::errors::{CipherSafeError, Result};
use crate::transfer::{export_store, protect, write_table, TableFormat};

/// Execute the `export` command.
pub async fn execute(
    cli: &Cli,
    format: Option<&str>,
    output_path: Option<&str>,
    protected: bool,
) -> Result<()> {
    let format = match (format, output_path) {
        (Some(f), _) => f.parse::<TableFormat>()?,
        (None, Some(dest)) => TableFormat::detect(Path::new(dest)),
        (None, None) => TableFormat::Csv,
    };

    if let Some(dest) = output_path {
        if Path::new(dest)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csafe"))
        {
            return Err(CipherSafeError::CommandFailed(
                "refusing to export over a .csafe file".into(),
            ));
        }
    }

    let ctx = Context::load(cli)?;
    let password = if protected {
        Some(prompt_export_password(true)?)
    } else {
        None
    };
    let vault = ctx.unlock().await?;
    let table = export_store(vault.store()).await?;
    vault.lock().await;

    log_audit(
        &ctx,
        "export",
        None,
        Some(&format!(
            "{} records, format: {format:?}, protected: {protected}",
            table.rows.len()
        )),
    );

    match (output_path, password) {
        (Some(dest), Some(password)) => {
            let mut plain = Zeroizing::new(Vec::new());
            write_table(&table, format, &mut *plain)?;
            let sealed = protect(&plain, password.as_bytes(), ctx.settings.kdf_params())?;
            let mut file = File::create(dest).map_err(|e| {
                CipherSafeError::CommandFailed(format!("failed to write export file: {e}"))
            })?;
            restrict_permissions(Path::new(dest));
            file.write_all(&sealed)?;
            output::success(&format!(
                "Exported {} records to {dest} (password protected)",
                table.rows.len()
            ));
        }
        (None, Some(_)) => {
            return Err(CipherSafeError::CommandFailed(
                "--protect needs --output".into(),
            ))
        }
        (Some(dest), None) => {
            let file = File::create(dest).map_err(|e| {
                CipherSafeError::CommandFailed(format!("failed to write export file: {e}"))
            })?;
            restrict_permissions(Path::new(dest));
            write_table(&table, format, file)?;
            output::success(&format!("Exported {} records to {dest}", table.rows.len()));
            output::warning("The export file contains plaintext passwords.");
        }
        (None, None) => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_table(&table, format, &mut lock)?;
            lock.flush()?;
        }
    }

    Ok(())
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    let _ = path;
}
