use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::{TimeZone, Utc};
use predicates::str::contains;
use tempfile::TempDir;

use tasklink_core::config::{
    self, ENV_NOTION_PROJECTS_DB, ENV_NOTION_TASKS_DB, ENV_NOTION_TOKEN, ENV_NOTION_VARIABLES_DB,
    ENV_TODOIST_TOKEN,
};
use tasklink_core::types::{CursorState, SyncCursor};
use tasklink_sync::cursor_store;

/// The binary with `HOME` pointed at a temp dir and no credentials leaking
/// in from the caller's environment or a `.env` file.
fn tasklink_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tasklink"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .current_dir(home)
        .env_remove("RUST_LOG");
    for key in [
        ENV_NOTION_TOKEN,
        ENV_TODOIST_TOKEN,
        ENV_NOTION_TASKS_DB,
        ENV_NOTION_PROJECTS_DB,
        ENV_NOTION_VARIABLES_DB,
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("home");

    tasklink_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Wrote"));
    assert!(config::config_path_at(home.path()).exists());

    tasklink_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("already exists"));
}

#[test]
fn sync_without_tokens_names_the_missing_value() {
    let home = TempDir::new().expect("home");
    tasklink_cmd(home.path()).arg("init").assert().success();

    tasklink_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("missing required config value `notion.token`"));
}

#[test]
fn sync_before_init_points_at_init() {
    let home = TempDir::new().expect("home");
    tasklink_cmd(home.path())
        .args(["sync", "--dry-run"])
        .assert()
        .failure()
        .stderr(contains("tasklink init"));
}

#[test]
fn status_json_on_fresh_home_reports_full_resync() {
    let home = TempDir::new().expect("home");
    let assert = tasklink_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let status: serde_json::Value = serde_json::from_str(&stdout).expect("status JSON");

    assert_eq!(status["cursor_store"], "file");
    assert_eq!(status["full_resync"], true);
    assert_eq!(status["mirror_cursor"], "*");
    assert_eq!(status["daemon"]["running"], false);
    assert_eq!(status["pending"], serde_json::json!({}));
}

#[test]
fn reset_forgets_saved_cursors() {
    let home = TempDir::new().expect("home");
    let started = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 15).unwrap();
    cursor_store::save_at(
        home.path(),
        &CursorState::advanced(SyncCursor("tok-7".into()), started),
    )
    .expect("seed cursors");

    tasklink_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(contains("tok-7"));

    tasklink_cmd(home.path())
        .arg("reset")
        .assert()
        .success()
        .stdout(contains("full resync"));

    let state = cursor_store::load_at(home.path()).expect("load");
    assert_eq!(state, CursorState::initial());
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");
    tasklink_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));

    tasklink_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}
