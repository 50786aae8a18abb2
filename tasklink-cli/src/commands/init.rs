//! `tasklink init`

use anyhow::{Context, Result};
use clap::Args;

use tasklink_core::config::{self, ENV_NOTION_TOKEN, ENV_TODOIST_TOKEN};

/// Write a default config if none exists.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let (_, created) = config::init_at(&home).context("failed to initialise config")?;
        let path = config::config_path_at(&home);
        if created {
            println!("✓ Wrote {}", path.display());
            println!(
                "  Fill in the database ids, and the tokens or set {ENV_NOTION_TOKEN} / {ENV_TODOIST_TOKEN}."
            );
        } else {
            println!("✓ Config already exists at {}", path.display());
        }
        Ok(())
    }
}
