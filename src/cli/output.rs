//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::vault::record::{CredentialRecord, FIELD_USERNAME};

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Fixed-width mask so the length of a secret is not revealed.
pub fn mask(_value: &str) -> &'static str {
    "********"
}

/// Print a table of records (Account Name, Username, Updated, Id).
pub fn print_records_table(records: &[CredentialRecord]) {
    if records.is_empty() {
        info("No records in this vault yet.");
        tip("Run `ciphersafe add <ACCOUNT>` to add your first credential.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Account Name", "Username", "Updated", "Id"]);

    for r in records {
        let mut title = r.title.clone();
        if r.deleted {
            title = format!("{title} (deleted)");
        }
        table.add_row(vec![
            title,
            r.field(FIELD_USERNAME).unwrap_or("-").to_string(),
            r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            r.id.to_string(),
        ]);
    }

    println!("{table}");
}

/// Print one record's fields, masking values unless `show` is set.
pub fn print_record(record: &CredentialRecord, show: bool) {
    println!("{}", style(&record.title).bold());
    if let Some(original) = record.conflict_of {
        println!("  {} {original}", style("conflict copy of").yellow());
    }
    for (name, value) in &record.fields {
        let shown = if show || name == FIELD_USERNAME {
            value.as_str()
        } else {
            mask(value)
        };
        println!("  {}: {shown}", style(name).cyan());
    }
    println!(
        "  {} {} (revision {})",
        style("updated").dim(),
        record.updated_at.format("%Y-%m-%d %H:%M:%S"),
        record.revision
    );
}
