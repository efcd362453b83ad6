//! Integration tests for the CipherSafe CLI.
//!
//! These tests exercise the binary end-to-end using `assert_cmd`.  The
//! passphrase comes from `CIPHERSAFE_PASSPHRASE` and passwords are piped
//! on stdin, so no test needs a terminal.  Each project directory carries
//! a `.ciphersafe.toml` with the cheapest accepted Argon2 settings.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PASSPHRASE: &str = "correct horse battery";

const FAST_CONFIG: &str = "argon2_memory_kib = 8192\nargon2_iterations = 1\nargon2_parallelism = 1\n";

/// Helper: get a Command pointing at the ciphersafe binary.
fn ciphersafe() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("ciphersafe").expect("binary should exist")
}

/// A project directory with fast KDF settings.
fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".ciphersafe.toml"), FAST_CONFIG).unwrap();
    dir
}

/// Command running in `dir` with the passphrase in the environment.
fn in_project(dir: &Path) -> Command {
    let mut cmd = ciphersafe();
    cmd.current_dir(dir).env("CIPHERSAFE_PASSPHRASE", PASSPHRASE);
    cmd
}

fn init(dir: &Path) {
    in_project(dir).arg("init").assert().success();
}

fn add(dir: &Path, title: &str, username: &str, password: &str) {
    in_project(dir)
        .args(["add", title, "--username", username])
        .write_stdin(format!("{password}\n"))
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// Help and version
// ---------------------------------------------------------------------------

#[test]
fn help_flag_shows_usage() {
    ciphersafe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Encrypted password vault"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("restore"))
        .stdout(predicate::str::contains("passwd"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("import"));
}

#[test]
fn version_flag_shows_version() {
    ciphersafe()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ciphersafe"));
}

#[test]
fn no_args_shows_help() {
    ciphersafe()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn completions_bash() {
    ciphersafe()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ciphersafe"));
}

#[test]
fn completions_unknown_shell_fails() {
    ciphersafe().args(["completions", "csh"]).assert().failure();
}

// ---------------------------------------------------------------------------
// Vault lifecycle
// ---------------------------------------------------------------------------

#[test]
fn init_creates_vault_once() {
    let dir = project();
    in_project(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));
    assert!(dir.path().join(".ciphersafe/default.csafe").exists());

    in_project(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn init_rejects_short_passphrase() {
    let dir = project();
    ciphersafe()
        .current_dir(dir.path())
        .env("CIPHERSAFE_PASSPHRASE", "short")
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 8"));
    assert!(!dir.path().join(".ciphersafe/default.csafe").exists());
}

#[test]
fn get_on_missing_vault_fails() {
    let dir = project();
    in_project(dir.path())
        .args(["get", "Bank"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Vault not found"));
}

#[test]
fn invalid_vault_name_is_rejected() {
    let dir = project();
    in_project(dir.path())
        .args(["--vault", "Bad Name", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn add_get_list_roundtrip() {
    let dir = project();
    init(dir.path());
    add(dir.path(), "Bank", "alice", "s3cr3t");

    in_project(dir.path())
        .args(["get", "Bank"])
        .assert()
        .success()
        .stdout(predicate::str::contains("alice"))
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("s3cr3t").not());

    in_project(dir.path())
        .args(["get", "bank", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s3cr3t"));

    in_project(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bank"))
        .stdout(predicate::str::contains("alice"));

    // Same title twice is refused.
    in_project(dir.path())
        .args(["add", "Bank", "--no-password"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn wrong_passphrase_fails_without_revealing_records() {
    let dir = project();
    init(dir.path());
    add(dir.path(), "Bank", "alice", "s3cr3t");

    ciphersafe()
        .current_dir(dir.path())
        .env("CIPHERSAFE_PASSPHRASE", "not the passphrase")
        .args(["get", "Bank", "--show"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("s3cr3t").not())
        .stderr(predicate::str::contains("Authentication failed"));

    in_project(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("records:         1"));
}

#[test]
fn edit_and_delete() {
    let dir = project();
    init(dir.path());
    add(dir.path(), "Bank", "alice", "s3cr3t");

    in_project(dir.path())
        .args(["edit", "Bank", "--username", "bob", "--field", "pin=1234"])
        .assert()
        .success()
        .stdout(predicate::str::contains("revision 2"));
    in_project(dir.path())
        .args(["get", "Bank", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bob"))
        .stdout(predicate::str::contains("1234"));

    in_project(dir.path())
        .args(["delete", "Bank", "--force"])
        .assert()
        .success();
    in_project(dir.path())
        .args(["get", "Bank"])
        .assert()
        .failure();
    in_project(dir.path())
        .args(["list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(deleted)"));
}

#[test]
fn status_without_passphrase_stays_locked() {
    let dir = project();
    init(dir.path());

    ciphersafe()
        .current_dir(dir.path())
        .env_remove("CIPHERSAFE_PASSPHRASE")
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("locked"))
        .stdout(predicate::str::contains("default.csafe"))
        .stdout(predicate::str::contains("records:").not());
}

// ---------------------------------------------------------------------------
// Spreadsheet transfer
// ---------------------------------------------------------------------------

#[test]
fn export_csv_to_stdout() {
    let dir = project();
    init(dir.path());
    add(dir.path(), "Bank", "alice", "s3cr3t");

    in_project(dir.path())
        .arg("export")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "Account Name,Username,Password,Notes",
        ))
        .stdout(predicate::str::contains("Bank,alice,s3cr3t,"));
}

#[test]
fn export_refuses_vault_file_target() {
    let dir = project();
    init(dir.path());
    in_project(dir.path())
        .args(["export", "--output", "backup.csafe"])
        .assert()
        .failure();
}

#[test]
fn import_csv_file() {
    let dir = project();
    init(dir.path());
    let file = dir.path().join("passwords.csv");
    std::fs::write(
        &file,
        "Account Name,Username,Password\nBank,alice,s3cr3t\nMail,bob,hunter2\n,orphan,x\n",
    )
    .unwrap();

    in_project(dir.path())
        .args(["import", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 created"))
        .stderr(predicate::str::contains("row 3 skipped"));

    in_project(dir.path())
        .args(["get", "Mail", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2"));
}

#[test]
fn protected_export_round_trips_through_import() {
    let dir = project();
    init(dir.path());
    add(dir.path(), "Bank", "alice", "s3cr3t");

    in_project(dir.path())
        .env("CIPHERSAFE_EXPORT_PASSWORD", "export only")
        .args(["export", "--protect", "--output", "backup.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("password protected"));
    let bytes = std::fs::read(dir.path().join("backup.csv")).unwrap();
    assert!(bytes.starts_with(b"CSXP"));
    assert!(!String::from_utf8_lossy(&bytes).contains("s3cr3t"));

    let other = project();
    init(other.path());
    let backup = dir.path().join("backup.csv");
    in_project(other.path())
        .env("CIPHERSAFE_EXPORT_PASSWORD", "not it")
        .args(["import", backup.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("wrong export password"));
    in_project(other.path())
        .env("CIPHERSAFE_EXPORT_PASSWORD", "export only")
        .args(["import", backup.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 created"));
    in_project(other.path())
        .args(["get", "Bank", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s3cr3t"));
}

#[test]
fn protected_export_needs_an_output_file() {
    let dir = project();
    init(dir.path());
    in_project(dir.path())
        .env("CIPHERSAFE_EXPORT_PASSWORD", "export only")
        .args(["export", "--protect"])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// Sync and restore
// ---------------------------------------------------------------------------

#[test]
fn sync_watch_uploads_then_stops_at_idle_lock() {
    let remote = TempDir::new().unwrap();
    let remote_arg = remote.path().to_str().unwrap();
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(".ciphersafe.toml"),
        format!("{FAST_CONFIG}idle_timeout_secs = 1\nsync_interval_secs = 3600\n"),
    )
    .unwrap();
    init(dir.path());
    add(dir.path(), "Bank", "alice", "s3cr3t");

    in_project(dir.path())
        .args(["sync", "--watch", "--remote", remote_arg])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("every 3600s"))
        .stdout(predicate::str::contains("uploaded"))
        .stdout(predicate::str::contains("idle timeout"));
    assert!(remote.path().join("cipherSafe").join("vault.csafe").exists());
}

#[test]
fn sync_without_remote_fails() {
    let dir = project();
    init(dir.path());
    in_project(dir.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no remote configured"));
}

#[test]
fn sync_then_restore_on_second_device() {
    let remote = TempDir::new().unwrap();
    let remote_arg = remote.path().to_str().unwrap();
    let first = project();
    let second = project();

    init(first.path());
    add(first.path(), "Bank", "alice", "s3cr3t");
    in_project(first.path())
        .args(["sync", "--remote", remote_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("uploaded"));
    in_project(first.path())
        .args(["sync", "--remote", remote_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("already in sync"));

    in_project(second.path())
        .args(["restore", "--remote", remote_arg])
        .assert()
        .success();
    in_project(second.path())
        .args(["get", "Bank", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s3cr3t"));

    // Edits on the second device reach the first.
    add(second.path(), "Mail", "bob", "hunter2");
    in_project(second.path())
        .args(["sync", "--remote", remote_arg])
        .assert()
        .success();
    in_project(first.path())
        .args(["sync", "--remote", remote_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("pulled"));
    in_project(first.path())
        .args(["get", "Mail", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2"));

    // Restoring over an existing vault is refused.
    in_project(second.path())
        .args(["restore", "--remote", remote_arg])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn passwd_then_unlock_with_new_passphrase() {
    let dir = project();
    init(dir.path());

    in_project(dir.path())
        .env("CIPHERSAFE_NEW_PASSPHRASE", "a much better passphrase")
        .arg("passwd")
        .assert()
        .success();

    in_project(dir.path()).arg("list").assert().failure();
    ciphersafe()
        .current_dir(dir.path())
        .env("CIPHERSAFE_PASSPHRASE", "a much better passphrase")
        .arg("list")
        .assert()
        .success();
}

#[test]
fn wipe_removes_vault() {
    let dir = project();
    init(dir.path());
    in_project(dir.path())
        .args(["wipe", "--force"])
        .assert()
        .success();
    assert!(!dir.path().join(".ciphersafe/default.csafe").exists());
}

#[cfg(feature = "audit-log")]
#[test]
fn audit_log_records_operations() {
    let dir = project();
    init(dir.path());
    add(dir.path(), "Bank", "alice", "s3cr3t");

    in_project(dir.path())
        .args(["audit", "--last", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("s3cr3t").not());
}
