//! `ciphersafe audit`: display the audit log.
//!
//! Usage:
//!   ciphersafe audit               # show last 50 entries
//!   ciphersafe audit --last 20     # show last 20
//!   ciphersafe audit --since 7d    # entries from last 7 days

use chrono::Utc;

use crate::cli::{Cli, Context};
use crate::errors::{CipherSafeError, Result};

/// Execute the `audit` command.
#[cfg(feature = "audit-log")]
pub fn execute(cli: &Cli, last: usize, since: Option<&str>) -> Result<()> {
    use crate::audit::AuditLog;
    use crate::cli::output;

    let ctx = Context::load(cli)?;
    let audit = AuditLog::open(&ctx.vault_dir())
        .ok_or_else(|| CipherSafeError::AuditError("failed to open audit database".into()))?;

    let since_dt = since.map(parse_duration).transpose()?;
    let entries = audit.query(last, since_dt)?;

    if entries.is_empty() {
        output::info("No audit entries found.");
        return Ok(());
    }

    print_audit_table(&entries);
    Ok(())
}

#[cfg(not(feature = "audit-log"))]
pub fn execute(cli: &Cli, _last: usize, since: Option<&str>) -> Result<()> {
    Context::load(cli)?;
    since.map(parse_duration).transpose()?;
    Err(CipherSafeError::AuditError(
        "this build was compiled without the audit-log feature".into(),
    ))
}

/// Parse a human-friendly duration string like "7d", "24h", "30m".
fn parse_duration(input: &str) -> Result<chrono::DateTime<Utc>> {
    let input = input.trim();
    let invalid = || {
        CipherSafeError::CommandFailed(format!(
            "invalid duration '{input}', use a format like 7d, 24h, or 30m"
        ))
    };

    let (num_str, unit) = input
        .char_indices()
        .last()
        .map(|(i, unit)| (&input[..i], unit))
        .ok_or_else(invalid)?;
    let num: i64 = num_str.parse().map_err(|_| invalid())?;

    let duration = match unit {
        'd' => chrono::Duration::days(num),
        'h' => chrono::Duration::hours(num),
        'm' => chrono::Duration::minutes(num),
        _ => return Err(invalid()),
    };

    Ok(Utc::now() - duration)
}

/// Print audit entries in a formatted table.
#[cfg(feature = "audit-log")]
fn print_audit_table(entries: &[crate::audit::AuditEntry]) {
    use comfy_table::{ContentArrangement, Table};
    use console::style;

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Operation", "Vault", "Record", "Details"]);

    for entry in entries {
        table.add_row(vec![
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            colorize_operation(&entry.operation),
            entry.vault.clone(),
            entry.record.clone().unwrap_or_else(|| "-".into()),
            entry.details.clone().unwrap_or_else(|| "-".into()),
        ]);
    }

    println!("{}", style(format!("{} audit entries:", entries.len())).bold());
    println!("{table}");
}

#[cfg(feature = "audit-log")]
fn colorize_operation(op: &str) -> String {
    use console::style;

    match op {
        "create" | "restore" => style(op).green().to_string(),
        "add" | "edit" => style(op).blue().to_string(),
        "delete" | "purge" | "wipe" => style(op).red().to_string(),
        "unlock-failed" | "lockout" | "sync-failed" => style(op).red().bold().to_string(),
        "passwd" => style(op).yellow().to_string(),
        "export" | "import" => style(op).cyan().to_string(),
        "sync" => style(op).magenta().to_string(),
        _ => op.to_string(),
    }
}
