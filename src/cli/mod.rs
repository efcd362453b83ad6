//! CLI module: Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::errors::{CipherSafeError, Result};
use crate::sync::engine::SyncEngine;
use crate::sync::remote::DirectoryObjectStore;
use crate::unlock::lockout::Lockout;
use crate::vault::persistence::{ContainerPersistence, FilePersistence};
use crate::vault::record::CredentialRecord;
use crate::vault::session::{Vault, VaultOptions};
use crate::vault::store::VaultStore;

/// Minimum passphrase length to prevent trivially weak passphrases.
const MIN_PASSPHRASE_LEN: usize = 8;

/// Environment variable consulted before prompting for the passphrase.
pub const PASSPHRASE_ENV: &str = "CIPHERSAFE_PASSPHRASE";

/// Environment variable consulted before prompting for an export password.
pub const EXPORT_PASSWORD_ENV: &str = "CIPHERSAFE_EXPORT_PASSWORD";

/// CipherSafe CLI: encrypted password vault with folder sync.
#[derive(Parser)]
#[command(
    name = "ciphersafe",
    about = "Encrypted password vault with passphrase unlock and folder sync",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Vault directory (default: .ciphersafe, or `vault_dir` from .ciphersafe.toml)
    #[arg(long, global = true)]
    pub vault_dir: Option<String>,

    /// Vault name (default: `default_vault` from .ciphersafe.toml)
    #[arg(long, global = true)]
    pub vault: Option<String>,

    /// Directory used as the sync remote
    #[arg(long, global = true)]
    pub remote: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new vault
    Init,

    /// Add a credential (password is prompted or read from stdin)
    Add {
        /// Account name
        title: String,
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        notes: Option<String>,
        /// Extra secret field as name=value (repeatable)
        #[arg(long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
        /// Do not ask for a password
        #[arg(long)]
        no_password: bool,
    },

    /// Show a credential
    Get {
        /// Account name or record id
        record: String,
        /// Print secret values instead of masking them
        #[arg(long)]
        show: bool,
    },

    /// List credentials
    List {
        /// Only titles containing this text
        #[arg(short, long)]
        search: Option<String>,
        /// Only conflict copies
        #[arg(long)]
        conflicts: bool,
        /// Include deleted records
        #[arg(long)]
        all: bool,
    },

    /// Change a credential
    Edit {
        /// Account name or record id
        record: String,
        /// New account name
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        notes: Option<String>,
        /// Prompt for a new password
        #[arg(long)]
        password: bool,
        /// Set a field as name=value (repeatable)
        #[arg(long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
        /// Remove a field (repeatable)
        #[arg(long = "remove", value_name = "NAME")]
        remove: Vec<String>,
    },

    /// Delete a credential
    Delete {
        /// Account name or record id
        record: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Drop deleted records that every replica has already seen
    Purge,

    /// Export credentials as a spreadsheet
    Export {
        /// csv (default) or json
        #[arg(short, long)]
        format: Option<String>,
        /// Output file path (prints to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
        /// Encrypt the file under a separate export password
        #[arg(long, requires = "output")]
        protect: bool,
    },

    /// Import credentials from a spreadsheet
    Import {
        file: String,
        /// csv or json (auto-detected from extension)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Reconcile with the remote directory
    Sync {
        /// Keep running and sync every `sync_interval_secs` until Ctrl-C
        /// or the idle timeout locks the vault
        #[arg(long)]
        watch: bool,
    },

    /// Download the remote vault onto this device
    Restore,

    /// Show vault state
    Status,

    /// Change the master passphrase
    Passwd,

    /// Irreversibly destroy the vault on this device
    Wipe {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// View the audit log of vault operations
    Audit {
        /// Number of entries to show (default: 50)
        #[arg(long, default_value = "50")]
        last: usize,
        /// Show entries since a duration ago (e.g. 7d, 24h, 30m)
        #[arg(long)]
        since: Option<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell)
        shell: String,
    },
}

// ---------------------------------------------------------------------------
// Command context
// ---------------------------------------------------------------------------

/// Resolved settings and vault selection for one command.
pub struct Context {
    pub project_dir: PathBuf,
    pub settings: Settings,
    pub vault_name: String,
}

impl Context {
    /// Load `.ciphersafe.toml` from the working directory and apply CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_from(&std::env::current_dir()?, cli)
    }

    pub fn load_from(project_dir: &Path, cli: &Cli) -> Result<Self> {
        let mut settings = Settings::load(project_dir)?;
        if let Some(dir) = &cli.vault_dir {
            settings.vault_dir.clone_from(dir);
        }
        if let Some(remote) = &cli.remote {
            settings.remote_dir = Some(remote.clone());
        }
        let vault_name = cli
            .vault
            .clone()
            .unwrap_or_else(|| settings.default_vault.clone());
        validate_vault_name(&vault_name)?;

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            settings,
            vault_name,
        })
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.settings.vault_dir(&self.project_dir)
    }

    /// Example: `<cwd>/.ciphersafe/default.csafe`
    pub fn vault_path(&self) -> PathBuf {
        self.settings.vault_path(&self.project_dir, &self.vault_name)
    }

    pub fn persistence(&self) -> Arc<dyn ContainerPersistence> {
        Arc::new(FilePersistence::new(self.vault_path()))
    }

    pub fn lockout(&self) -> Result<Lockout> {
        Lockout::load(
            &self.settings.lockout_path(&self.project_dir, &self.vault_name),
            self.settings.lockout_policy(),
        )
    }

    pub fn vault_options(&self) -> Result<VaultOptions> {
        let replica = self.settings.replica_id(&self.project_dir)?;
        Ok(self.settings.vault_options(replica))
    }

    /// Sync engine over the configured remote directory.
    pub fn sync_engine(&self) -> Result<SyncEngine> {
        let remote = self.settings.remote_dir(&self.project_dir).ok_or_else(|| {
            CipherSafeError::ConfigError(
                "no remote configured; pass --remote <DIR> or set remote_dir in .ciphersafe.toml"
                    .into(),
            )
        })?;
        Ok(SyncEngine::new(
            Arc::new(DirectoryObjectStore::new(remote)),
            self.settings.sync_options(),
        ))
    }

    /// Open the vault without unlocking it.
    pub async fn open_vault(&self) -> Result<Vault> {
        let path = self.vault_path();
        if !path.exists() {
            output::tip("Run `ciphersafe init` to create a vault.");
            return Err(CipherSafeError::VaultNotFound(path));
        }
        Vault::open(self.persistence(), self.lockout()?, self.vault_options()?).await
    }

    /// Open the vault and unlock it with the passphrase.
    pub async fn unlock(&self) -> Result<Vault> {
        let vault = self.open_vault().await?;
        let passphrase = prompt_passphrase()?;
        match vault.unlock_with_passphrase(passphrase.as_bytes()).await {
            Ok(()) => Ok(vault),
            Err(e) => {
                match &e {
                    CipherSafeError::AuthenticationFailure | CipherSafeError::UnlockTimedOut(_) => {
                        log_audit(
                            self,
                            "unlock-failed",
                            None,
                            Some(&format!("{} consecutive", vault.failed_attempts())),
                        );
                    }
                    CipherSafeError::LockoutActive { remaining } => {
                        log_audit(
                            self,
                            "lockout",
                            None,
                            Some(&format!("{}s remaining", remaining.as_secs())),
                        );
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }
}

/// Log an audit event; a no-op when built without the `audit-log` feature.
pub fn log_audit(ctx: &Context, op: &str, record: Option<&str>, details: Option<&str>) {
    #[cfg(feature = "audit-log")]
    crate::audit::log_audit(ctx, op, record, details);

    #[cfg(not(feature = "audit-log"))]
    let _ = (ctx, op, record, details);
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Get the vault passphrase from `CIPHERSAFE_PASSPHRASE` or an interactive prompt.
///
/// Returns `Zeroizing<String>` so the passphrase is wiped from memory on drop.
pub fn prompt_passphrase() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSPHRASE_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Enter vault passphrase")
        .interact()
        .map_err(|e| CipherSafeError::CommandFailed(format!("passphrase prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new passphrase with confirmation (used by `init` and `passwd`).
///
/// `new_env` names an environment variable checked first, for scripted use.
/// Enforces a minimum passphrase length.
pub fn prompt_new_passphrase(new_env: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(new_env) {
        if !pw.is_empty() {
            if pw.chars().count() < MIN_PASSPHRASE_LEN {
                return Err(CipherSafeError::CommandFailed(format!(
                    "passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
                )));
            }
            return Ok(Zeroizing::new(pw));
        }
    }

    loop {
        let passphrase = dialoguer::Password::new()
            .with_prompt("Choose vault passphrase")
            .with_confirmation("Confirm vault passphrase", "Passphrases do not match, try again")
            .interact()
            .map_err(|e| CipherSafeError::CommandFailed(format!("passphrase prompt: {e}")))?;

        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            output::warning(&format!(
                "Passphrase must be at least {MIN_PASSPHRASE_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(Zeroizing::new(passphrase));
    }
}

/// Get an export password from `CIPHERSAFE_EXPORT_PASSWORD` or a prompt.
///
/// `confirm` asks twice, for writing a new protected export.
pub fn prompt_export_password(confirm: bool) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(EXPORT_PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    let mut prompt = dialoguer::Password::new().with_prompt("Export password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm export password", "Passwords do not match, try again");
    }
    let pw = prompt
        .interact()
        .map_err(|e| CipherSafeError::CommandFailed(format!("password prompt: {e}")))?;
    if pw.is_empty() {
        return Err(CipherSafeError::CommandFailed("export password must not be empty".into()));
    }
    Ok(Zeroizing::new(pw))
}

/// Find a live record by id or by (case-insensitive) title.
pub async fn resolve_record(store: &VaultStore, key: &str) -> Result<CredentialRecord> {
    if let Ok(id) = Uuid::parse_str(key) {
        return store.get(id).await;
    }
    store
        .find_by_title(key)
        .await?
        .ok_or_else(|| CipherSafeError::CommandFailed(format!("no record titled '{key}'")))
}

/// Split `name=value` arguments.
pub fn parse_field_args(args: &[String]) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.to_string()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| {
                    CipherSafeError::CommandFailed(format!(
                        "invalid field '{arg}', expected NAME=VALUE"
                    ))
                })
        })
        .collect()
}

/// Validate that a vault name is safe to use as a file name.
///
/// Allowed: lowercase letters, digits, hyphens. Must not be empty
/// or start/end with a hyphen. Max length 64 characters.
pub fn validate_vault_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CipherSafeError::ConfigError("vault name cannot be empty".into()));
    }

    if name.len() > 64 {
        return Err(CipherSafeError::ConfigError(
            "vault name cannot exceed 64 characters".into(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(CipherSafeError::ConfigError(format!(
            "vault name '{name}' is invalid: only lowercase letters, digits, and hyphens are allowed"
        )));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(CipherSafeError::ConfigError(format!(
            "vault name '{name}' cannot start or end with a hyphen"
        )));
    }

    Ok(())
}
