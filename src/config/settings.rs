use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::KdfParams;
use crate::errors::{CipherSafeError, Result};
use crate::sync::engine::SyncOptions;
use crate::sync::remote::DEFAULT_REMOTE_KEY;
use crate::unlock::lockout::LockoutPolicy;
use crate::vault::session::VaultOptions;

/// Local configuration, loaded from `.ciphersafe.toml`.
///
/// Every field has a sensible default so CipherSafe works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory (relative to the working directory) holding vault files.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: String,

    /// Vault name used when `--vault` is not given.
    #[serde(default = "default_vault")]
    pub default_vault: String,

    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Failed unlocks tolerated before cooldowns start.
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,

    #[serde(default = "default_lockout_base_cooldown_secs")]
    pub lockout_base_cooldown_secs: u64,

    #[serde(default = "default_lockout_max_cooldown_secs")]
    pub lockout_max_cooldown_secs: u64,

    /// Lock after this many idle seconds; 0 disables.
    #[serde(default)]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_unlock_timeout_secs")]
    pub unlock_timeout_secs: u64,

    /// Timeout for each remote call during sync.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,

    #[serde(default = "default_sync_max_attempts")]
    pub sync_max_attempts: u32,

    /// Background sync period (default: 7 days).
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Directory used as the remote object store, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_dir: Option<String>,

    #[serde(default = "default_remote_key")]
    pub remote_key: String,

    /// Fixed replica id; generated and persisted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_id: Option<String>,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_vault_dir() -> String {
    ".ciphersafe".to_string()
}

fn default_vault() -> String {
    "default".to_string()
}

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_lockout_threshold() -> u32 {
    5
}

fn default_lockout_base_cooldown_secs() -> u64 {
    60
}

fn default_lockout_max_cooldown_secs() -> u64 {
    3_600
}

fn default_unlock_timeout_secs() -> u64 {
    60
}

fn default_sync_timeout_secs() -> u64 {
    30
}

fn default_sync_max_attempts() -> u32 {
    3
}

fn default_sync_interval_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_remote_key() -> String {
    DEFAULT_REMOTE_KEY.to_string()
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_dir: default_vault_dir(),
            default_vault: default_vault(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            lockout_threshold: default_lockout_threshold(),
            lockout_base_cooldown_secs: default_lockout_base_cooldown_secs(),
            lockout_max_cooldown_secs: default_lockout_max_cooldown_secs(),
            idle_timeout_secs: 0,
            unlock_timeout_secs: default_unlock_timeout_secs(),
            sync_timeout_secs: default_sync_timeout_secs(),
            sync_max_attempts: default_sync_max_attempts(),
            sync_interval_secs: default_sync_interval_secs(),
            remote_dir: None,
            remote_key: default_remote_key(),
            replica_id: None,
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the working directory.
    const FILE_NAME: &'static str = ".ciphersafe.toml";

    /// File under the vault directory holding the generated replica id.
    const REPLICA_FILE: &'static str = "replica-id";

    /// Load settings from `<project_dir>/.ciphersafe.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            CipherSafeError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    pub fn vault_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.vault_dir)
    }

    /// Example: `project_dir/.ciphersafe/default.csafe`
    pub fn vault_path(&self, project_dir: &Path, vault_name: &str) -> PathBuf {
        self.vault_dir(project_dir).join(format!("{vault_name}.csafe"))
    }

    /// Where the failed-unlock ledger for `vault_name` lives.
    pub fn lockout_path(&self, project_dir: &Path, vault_name: &str) -> PathBuf {
        self.vault_dir(project_dir)
            .join(format!("{vault_name}.lockout.json"))
    }

    /// Remote directory resolved against the working directory.
    pub fn remote_dir(&self, project_dir: &Path) -> Option<PathBuf> {
        self.remote_dir.as_ref().map(|dir| project_dir.join(dir))
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            threshold: self.lockout_threshold,
            base_cooldown: Duration::from_secs(self.lockout_base_cooldown_secs),
            max_cooldown: Duration::from_secs(self.lockout_max_cooldown_secs),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn vault_options(&self, replica_id: impl Into<String>) -> VaultOptions {
        VaultOptions {
            kdf: self.kdf_params(),
            idle_timeout: self.idle_timeout(),
            unlock_timeout: Duration::from_secs(self.unlock_timeout_secs.max(1)),
            ..VaultOptions::new(replica_id)
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            remote_key: self.remote_key.clone(),
            call_timeout: Duration::from_secs(self.sync_timeout_secs.max(1)),
            max_attempts: self.sync_max_attempts.max(1),
        }
    }

    /// This device's replica id.
    ///
    /// Uses the configured id when set.  Otherwise reads
    /// `<vault_dir>/replica-id`, creating it with a random id on first use.
    pub fn replica_id(&self, project_dir: &Path) -> Result<String> {
        if let Some(id) = self.replica_id.as_deref().map(str::trim) {
            if id.is_empty() {
                return Err(CipherSafeError::ConfigError(
                    "replica_id must not be empty".into(),
                ));
            }
            return Ok(id.to_string());
        }

        let path = self.vault_dir(project_dir).join(Self::REPLICA_FILE);
        if path.exists() {
            let stored = std::fs::read_to_string(&path)?;
            let stored = stored.trim();
            if !stored.is_empty() {
                return Ok(stored.to_string());
            }
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        std::fs::create_dir_all(self.vault_dir(project_dir))?;
        std::fs::write(&path, format!("{id}\n"))?;
        tracing::debug!(replica = %id, "generated replica id");
        Ok(id)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.vault_dir, ".ciphersafe");
        assert_eq!(s.default_vault, "default");
        assert_eq!(s.argon2_memory_kib, 65_536);
        assert_eq!(s.lockout_threshold, 5);
        assert_eq!(s.sync_interval(), Duration::from_secs(604_800));
        assert_eq!(s.remote_key, DEFAULT_REMOTE_KEY);
        assert!(s.idle_timeout().is_none());
        assert!(s.remote_dir.is_none());
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.default_vault, "default");
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
vault_dir = "secrets"
default_vault = "personal"
argon2_memory_kib = 8192
argon2_iterations = 1
argon2_parallelism = 1
lockout_threshold = 3
idle_timeout_secs = 300
remote_dir = "drive"
replica_id = "laptop"
"#;
        fs::write(tmp.path().join(".ciphersafe.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.vault_dir, "secrets");
        assert_eq!(settings.default_vault, "personal");
        assert_eq!(settings.kdf_params(), KdfParams::minimum());
        assert_eq!(settings.lockout_policy().threshold, 3);
        assert_eq!(settings.idle_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(settings.remote_dir(tmp.path()), Some(tmp.path().join("drive")));
        assert_eq!(settings.replica_id(tmp.path()).unwrap(), "laptop");
    }

    #[test]
    fn load_uses_defaults_for_missing_fields() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".ciphersafe.toml"), "default_vault = \"work\"\n").unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.default_vault, "work");
        assert_eq!(settings.vault_dir, ".ciphersafe");
        assert_eq!(settings.argon2_iterations, 3);
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".ciphersafe.toml"), "not valid {{toml").unwrap();

        let result = Settings::load(tmp.path());
        assert!(matches!(result, Err(CipherSafeError::ConfigError(_))));
    }

    #[test]
    fn vault_and_lockout_paths() {
        let s = Settings::default();
        let project = Path::new("/home/user");
        assert_eq!(
            s.vault_path(project, "default"),
            PathBuf::from("/home/user/.ciphersafe/default.csafe")
        );
        assert_eq!(
            s.lockout_path(project, "default"),
            PathBuf::from("/home/user/.ciphersafe/default.lockout.json")
        );
    }

    #[test]
    fn runtime_options_follow_settings() {
        let s = Settings {
            unlock_timeout_secs: 5,
            sync_timeout_secs: 2,
            sync_max_attempts: 0,
            remote_key: "backup/v.csafe".into(),
            ..Settings::default()
        };
        let vault = s.vault_options("r1");
        assert_eq!(vault.replica_id, "r1");
        assert_eq!(vault.unlock_timeout, Duration::from_secs(5));

        let sync = s.sync_options();
        assert_eq!(sync.remote_key, "backup/v.csafe");
        assert_eq!(sync.call_timeout, Duration::from_secs(2));
        assert_eq!(sync.max_attempts, 1);
    }

    #[test]
    fn generated_replica_id_is_persisted() {
        let tmp = TempDir::new().unwrap();
        let s = Settings::default();
        let first = s.replica_id(tmp.path()).unwrap();
        let second = s.replica_id(tmp.path()).unwrap();
        assert_eq!(first, second);
        assert!(tmp.path().join(".ciphersafe/replica-id").exists());
    }
}
