//! `tasklink reset`: forget all cursors.

use anyhow::{Context, Result};
use clap::Args;

use tasklink_core::config;
use tasklink_core::types::CursorState;
use tasklink_core::ConfigError;
use tasklink_sync::CursorStore;

/// Reset the mirror cursor and both watermarks.
#[derive(Args, Debug)]
pub struct ResetArgs {}

impl ResetArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = match config::load_at(&home) {
            Ok(config) => config.with_env_overrides(|key| std::env::var(key).ok()),
            Err(ConfigError::ConfigNotFound { .. }) => Default::default(),
            Err(err) => return Err(err).context("failed to load config"),
        };
        let mut store = tasklink_stores::cursor_store(&home, &config)
            .context("failed to open cursor store")?;
        store
            .save(&CursorState::initial())
            .context("failed to reset cursors")?;
        println!("✓ Cursors reset; the next pass is a full resync");
        Ok(())
    }
}
