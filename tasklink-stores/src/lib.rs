//! # tasklink-stores
//!
//! Concrete stores for the sync engine: the Notion planner
//! ([`notion::NotionSource`]), the Todoist task list
//! ([`todoist::TodoistMirror`]) and the Notion-backed cursor store. Both
//! adapters share one [`http::HttpClient`] with the configured timeout and
//! retry budget.
//!
//! [`run_pass`] wires them from a [`Config`] and runs one pass.

pub mod http;
pub mod notion;
pub mod todoist;

use std::path::Path;

use tasklink_core::config::CursorStoreKind;
use tasklink_core::{Config, ConfigError};
use tasklink_sync::{CursorStore, FileCursorStore, PassMode, PassOptions, PassReport, SyncError};

use http::HttpClient;
use notion::{NotionClient, NotionSource, NotionVariableStore};
use todoist::TodoistMirror;

/// The cursor store selected by `cursor_store` in the config.
pub fn cursor_store(home: &Path, config: &Config) -> Result<Box<dyn CursorStore>, SyncError> {
    match config.cursor_store {
        CursorStoreKind::File => Ok(Box::new(FileCursorStore::new(home))),
        CursorStoreKind::Notion => {
            let database = config
                .notion
                .variables_database
                .as_deref()
                .filter(|db| !db.trim().is_empty())
                .ok_or(ConfigError::Missing {
                    key: "notion.variables_database",
                })?;
            let client = NotionClient::new(HttpClient::new(&config.http), &config.notion.token);
            Ok(Box::new(NotionVariableStore::new(client, database)))
        }
    }
}

/// Run one pass against the configured remote stores.
pub fn run_pass(home: &Path, config: &Config, mode: PassMode) -> Result<PassReport, SyncError> {
    let http = HttpClient::new(&config.http);
    let mut source = NotionSource::new(
        NotionClient::new(http.clone(), &config.notion.token),
        &config.notion,
    );
    let mut mirror = TodoistMirror::new(http, &config.todoist);
    let mut cursors = cursor_store(home, config)?;
    let options = PassOptions {
        mode,
        dump_dir: config.dump_dir.clone(),
    };
    tasklink_sync::run_pass(&mut source, &mut mirror, cursors.as_mut(), &options)
}
