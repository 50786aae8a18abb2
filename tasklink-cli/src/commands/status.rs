//! `tasklink status`: saved cursors and daemon state.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use tasklink_core::config::{self, Config, CursorStoreKind};
use tasklink_core::types::{CursorState, PendingWork};
use tasklink_core::ConfigError;
use tasklink_daemon::paths::socket_path;
use tasklink_daemon::{request_status, DaemonError};
use tasklink_sync::CursorStore;

/// Arguments for `tasklink status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson {
    config: String,
    cursor_store: &'static str,
    full_resync: bool,
    mirror_cursor: String,
    task_watermark: String,
    project_watermark: String,
    pending: PendingWork,
    daemon: Value,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = load_or_default(&home)?;
        let mut store = tasklink_stores::cursor_store(&home, &config)
            .context("failed to open cursor store")?;
        let cursors = store.load().context("failed to load cursors")?;
        let daemon = daemon_status(&home)?;

        let status = StatusJson {
            config: config::config_path_at(&home).display().to_string(),
            cursor_store: match config.cursor_store {
                CursorStoreKind::File => "file",
                CursorStoreKind::Notion => "notion",
            },
            full_resync: cursors.mirror_cursor.is_full_resync(),
            mirror_cursor: cursors.mirror_cursor.to_string(),
            task_watermark: cursors.task_watermark.to_string(),
            project_watermark: cursors.project_watermark.to_string(),
            pending: cursors.pending.clone(),
            daemon,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to serialize status")?
            );
        } else {
            print_human(&status, &cursors);
        }
        Ok(())
    }
}

/// Status works before `init`: a missing file reads as the defaults.
fn load_or_default(home: &Path) -> Result<Config> {
    let config = match config::load_at(home) {
        Ok(config) => config,
        Err(ConfigError::ConfigNotFound { .. }) => Config::default(),
        Err(err) => return Err(err).context("failed to load config"),
    };
    Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
}

fn daemon_status(home: &Path) -> Result<Value> {
    match request_status(home) {
        Ok(status) => Ok(status),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(serde_json::json!({
            "running": false,
            "socket": socket_path(home).display().to_string(),
        })),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn print_human(status: &StatusJson, cursors: &CursorState) {
    println!("Tasklink v{} | config {}", env!("CARGO_PKG_VERSION"), status.config);
    println!("cursor store:       {}", status.cursor_store);
    if cursors.mirror_cursor.is_full_resync() {
        println!("mirror cursor:      {}", "* (next pass is a full resync)".yellow());
    } else {
        println!("mirror cursor:      {}", status.mirror_cursor);
    }
    println!("tasks edited since: {}", status.task_watermark);
    println!("projects since:     {}", status.project_watermark);
    let pending = &status.pending;
    if !pending.is_empty() {
        let records = pending.retry_projects.len()
            + pending.retry_tasks.len()
            + pending.retry_mirror_projects.len()
            + pending.retry_mirror_tasks.len();
        println!(
            "carried over:       {}",
            format!(
                "{records} record(s) to retry, {} link(s) to record",
                pending.unrecorded_links.len()
            )
            .yellow()
        );
    }

    let running = status.daemon["running"].as_bool().unwrap_or(false);
    if !running {
        println!("daemon:             {}", "not running".bright_black());
        return;
    }
    println!("daemon:             {}", "running".green().bold());
    println!("passes run:         {}", status.daemon["passes_run"]);
    if let Some(error) = status.daemon["last_error"].as_str() {
        println!("last error:         {}", error.red());
    } else if let Some(last) = status.daemon["last_pass"].as_object() {
        println!(
            "last pass:          {} created, {} updated, {} failed",
            last["created"], last["updated"], last["failed"]
        );
    }
}
