//! CLI integration tests using `assert_cmd`.
//!
//! None of these reach a real database: they either fail before a store is
//! used or point at an emulator address that is never contacted.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get the CLI binary command with a clean environment.
#[allow(deprecated)]
fn migrate_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("controlaudit-migrate").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("GOOGLE_APPLICATION_CREDENTIALS")
        .env_remove("FIRESTORE_EMULATOR_HOST")
        .env_remove("FIRESTORE_PROJECT_ID")
        .env_remove("LEGACY_USER_ID")
        .env_remove("OWNER_ID")
        .env_remove("RUST_LOG");
    cmd
}

// =============================================================================
// Help & Argument Tests
// =============================================================================

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_export_requires_legacy_user_id() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir)
        .arg("export")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--legacy-user-id"));
}

#[test]
fn test_empty_legacy_user_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir)
        .args(["--emulator-host", "localhost:1"])
        .args(["export", "--legacy-user-id", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be empty"));
}

// =============================================================================
// Credential Tests
// =============================================================================

#[test]
fn test_export_without_credentials_fails() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir)
        .args(["export", "--legacy-user-id", "legacy123"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("credentials"));
}

#[test]
fn test_missing_credentials_file_fails() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir)
        .args(["--credentials", "/nonexistent/serviceAccountKey.json"])
        .args(["export", "--legacy-user-id", "legacy123"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
fn test_init_then_validate() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir).arg("init").assert().success();
    assert!(dir.path().join("migration.yaml").is_file());

    migrate_cmd(&dir)
        .args(["--config", "migration.yaml", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("apps/auditoria/owners"));
}

#[test]
fn test_rust_log_overrides_default_level() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir).arg("init").assert().success();

    migrate_cmd(&dir)
        .args(["--config", "migration.yaml", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loading configuration"));
    migrate_cmd(&dir)
        .env("RUST_LOG", "warn")
        .args(["--config", "migration.yaml", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loading configuration").not());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    migrate_cmd(&dir).arg("init").assert().success();
    migrate_cmd(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    migrate_cmd(&dir).args(["init", "--force"]).assert().success();
}

#[test]
fn test_invalid_config_file_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("bad.yaml"),
        "options:\n  workers: 0\n",
    )
    .unwrap();

    migrate_cmd(&dir)
        .args(["--config", "bad.yaml", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers"));
}

// =============================================================================
// Import Tests
// =============================================================================

#[test]
fn test_import_without_snapshot_imports_nothing() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("snapshots")).unwrap();

    migrate_cmd(&dir)
        .args(["--emulator-host", "localhost:1"])
        .args(["--snapshot-dir", "snapshots"])
        .args(["import", "--legacy-user-id", "legacy123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing imported"));
}
