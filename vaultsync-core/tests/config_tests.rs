//! Settings error-message and on-disk format tests.

use assert_fs::prelude::*;
use predicates::prelude::*;
use std::fs;
use vaultsync_core::{config, BackendPreference, ConfigError, SyncConfig};

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".vaultsync");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("config.yaml"), "must contain file path, got: {msg}");
}

#[test]
fn load_without_vault_path_is_a_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".vaultsync/config.yaml")
        .write_str("remote_url: https://example.com/notes.git\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. On-disk format
// ---------------------------------------------------------------------------

#[test]
fn saved_file_is_plain_yaml_with_snake_case_keys() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut settings = SyncConfig::new("/notes", "git@github.com:me/notes.git");
    settings.backend = BackendPreference::Sandboxed;
    settings.auto_sync_on_startup = true;
    config::save_at(home.path(), &settings).expect("save");

    let file = home.child(".vaultsync/config.yaml");
    file.assert(predicate::str::contains("remote_url: git@github.com:me/notes.git"));
    file.assert(predicate::str::contains("backend: sandboxed"));
    file.assert(predicate::str::contains("auto_sync_on_startup: true"));
    file.assert(predicate::str::contains("git_path").not());
}

#[test]
fn hand_written_settings_load_with_string_interval() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".vaultsync/config.yaml")
        .write_str(
            "vault_path: /home/me/notes\n\
             remote_url: https://github.com/me/notes.git\n\
             interval_minutes: \"30\"\n\
             check_status_on_startup: false\n",
        )
        .expect("write");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.interval_minutes, 30);
    assert!(!loaded.check_status_on_startup);
    assert_eq!(loaded.branch, "main");
}
