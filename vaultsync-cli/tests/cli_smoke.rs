use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use git2::Repository;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use vaultsync_core::config;

fn vaultsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vaultsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn bare_remote(dir: &TempDir) -> PathBuf {
    let remote = dir.path().join("remote.git");
    Repository::init_bare(&remote).expect("bare remote");
    remote
}

fn init_sandboxed(home: &Path, remote: &Path) {
    vaultsync_cmd(home)
        .args(["init", "vault", "--backend", "sandboxed", "--token", "secret-token"])
        .args(["--device", "smoke", "--remote"])
        .arg(remote)
        .assert()
        .success()
        .stdout(contains("Saved settings"));
}

#[test]
fn help_lists_subcommands() {
    let home = TempDir::new().expect("home");
    vaultsync_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("init").and(contains("sync")).and(contains("daemon")));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let home = TempDir::new().expect("home");
    let remote = bare_remote(&home);
    init_sandboxed(home.path(), &remote);

    vaultsync_cmd(home.path())
        .args(["init", "other", "--remote", "https://example.com/x.git"])
        .assert()
        .failure()
        .stderr(contains("--force"));

    vaultsync_cmd(home.path())
        .args(["init", "other", "--remote", "https://example.com/x.git", "--force"])
        .assert()
        .success();
    let saved = config::load_at(home.path()).expect("settings");
    assert_eq!(saved.remote_url, "https://example.com/x.git");
}

#[test]
fn config_show_masks_token_and_set_interval_persists() {
    let home = TempDir::new().expect("home");
    let remote = bare_remote(&home);
    init_sandboxed(home.path(), &remote);

    vaultsync_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("********").and(contains("secret-token").not()));

    vaultsync_cmd(home.path())
        .args(["config", "set-interval", "15"])
        .assert()
        .success()
        .stdout(contains("every 15 min"));
    assert_eq!(
        config::load_at(home.path()).expect("settings").interval_minutes,
        15
    );
}

#[test]
fn unknown_backend_is_rejected() {
    let home = TempDir::new().expect("home");
    vaultsync_cmd(home.path())
        .args(["init", "vault", "--remote", "x", "--backend", "cloud"])
        .assert()
        .failure()
        .stderr(contains("unknown backend 'cloud'"));
}

#[test]
fn sync_without_settings_points_at_init() {
    let home = TempDir::new().expect("home");
    vaultsync_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("vaultsync init"));
}

#[test]
fn sandboxed_sync_without_token_reports_missing_setting() {
    let home = TempDir::new().expect("home");
    vaultsync_cmd(home.path())
        .args(["init", "vault", "--backend", "sandboxed"])
        .args(["--remote", "https://example.com/notes.git"])
        .assert()
        .success();

    vaultsync_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stdout(contains("auth token is not configured"))
        .stderr(contains("sync failed"));
}

#[test]
fn sandboxed_sync_publishes_then_reports_up_to_date() {
    let home = TempDir::new().expect("home");
    let remote = bare_remote(&home);
    init_sandboxed(home.path(), &remote);

    let sandbox = config::sandbox_root_at(home.path());
    fs::create_dir_all(&sandbox).expect("sandbox root");
    fs::write(sandbox.join("todo.md"), "- water plants\n").expect("note");

    vaultsync_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(
            contains("Initialized repository")
                .and(contains("Committed"))
                .and(contains("Pushed main to remote")),
        );

    let bare = Repository::open_bare(&remote).expect("open remote");
    let tip = bare.refname_to_id("refs/heads/main").expect("remote main");
    let message = bare
        .find_commit(tip)
        .expect("tip commit")
        .message()
        .unwrap_or_default()
        .to_string();
    assert!(message.starts_with("smoke "), "{message}");

    vaultsync_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Vault is up to date").and(contains("sandboxed")));

    vaultsync_cmd(home.path())
        .args(["sync", "--json"])
        .assert()
        .success()
        .stdout(contains(r#""attempt": "completed""#).and(contains("push_skipped")));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");
    vaultsync_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains(r#""running": false"#));

    vaultsync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}
