//! Tasklink: keep a Notion planner and a Todoist task list in sync.
//!
//! # Usage
//!
//! ```text
//! tasklink init
//! tasklink sync [--dry-run] [--json]
//! tasklink status [--json]
//! tasklink reset
//! tasklink daemon start|stop|status|sync
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, reset::ResetArgs, status::StatusArgs, sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "tasklink",
    version,
    about = "Two-way sync between a Notion planner and a Todoist task list",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config scaffold to ~/.tasklink/config.yaml.
    Init(InitArgs),

    /// Run one reconciliation pass.
    Sync(SyncArgs),

    /// Show the saved cursors and whether the daemon is running.
    Status(StatusArgs),

    /// Forget the cursors; the next pass is a full resync.
    Reset(ResetArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    // Tokens may live in a .env file next to where the command runs.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Reset(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
