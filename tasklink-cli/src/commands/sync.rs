//! `tasklink sync`: run one reconciliation pass in the foreground.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use tasklink_core::config;
use tasklink_sync::{EntityReport, Outcome, PassMode, PassReport, PassSummary};

/// Arguments for `tasklink sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Read both stores and report the decisions without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Also list entities that needed no change.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        tasklink_daemon::init_tracing("warn");
        let home = super::home()?;
        let config = config::load_effective_at(&home)
            .context("failed to load config; run `tasklink init` and fill it in")?;

        let mode = if self.dry_run {
            PassMode::DryRun
        } else {
            PassMode::Live
        };
        let report =
            tasklink_stores::run_pass(&home, &config, mode).context("sync pass failed")?;
        let summary = report.summary(Utc::now());

        if self.json {
            print_json(&report, summary)?;
        } else {
            print_table(&report, &summary, self.verbose);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SyncReportJson<'a> {
    summary: PassSummary,
    entities: Vec<EntityJson<'a>>,
}

#[derive(Serialize)]
struct EntityJson<'a> {
    kind: String,
    direction: String,
    source_id: Option<&'a str>,
    mirror_id: Option<&'a str>,
    label: &'a str,
    outcome: &'static str,
    detail: String,
}

impl<'a> From<&'a EntityReport> for EntityJson<'a> {
    fn from(e: &'a EntityReport) -> Self {
        Self {
            kind: e.kind.to_string(),
            direction: e.direction.to_string(),
            source_id: e.source_id.as_ref().map(|id| id.as_str()),
            mirror_id: e.mirror_id.as_ref().map(|id| id.as_str()),
            label: &e.label,
            outcome: e.outcome.verb(),
            detail: e.outcome.detail(),
        }
    }
}

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "direction")]
    direction: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "name")]
    label: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_json(report: &PassReport, summary: PassSummary) -> Result<()> {
    let payload = SyncReportJson {
        summary,
        entities: report.entries.iter().map(EntityJson::from).collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize sync report")?
    );
    Ok(())
}

fn print_table(report: &PassReport, summary: &PassSummary, verbose: bool) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let rows: Vec<EntityRow> = report
        .entries
        .iter()
        .filter(|e| verbose || e.outcome != Outcome::Unchanged)
        .map(|e| EntityRow {
            direction: e.direction.to_string(),
            kind: e.kind.to_string(),
            label: truncate(&e.label, 40),
            outcome: outcome_label(&e.outcome),
            detail: e.outcome.detail(),
        })
        .collect();

    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    println!(
        "{prefix}✓ pass finished in {} ms: {} created, {} updated, {} unchanged, {} skipped, {} failed",
        summary.duration_ms,
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.skipped,
        summary.failed,
    );
    if report.dry_run {
        println!(
            "{prefix}{} mirror command(s) queued but not sent; cursors not advanced",
            summary.queued_commands
        );
    } else if let Some(cursor) = &summary.cursor {
        println!(
            "  {} command(s) committed, next cursor {cursor}",
            summary.committed_commands
        );
    }
    if summary.failed > 0 {
        println!(
            "{}",
            "Some entities failed; they are retried on the next pass.".yellow()
        );
    }
}

fn outcome_label(outcome: &Outcome) -> String {
    let verb = outcome.verb();
    match outcome {
        Outcome::Created => verb.green().bold().to_string(),
        Outcome::Updated(_) => verb.cyan().to_string(),
        Outcome::Unchanged => verb.bright_black().to_string(),
        Outcome::Skipped(_) => verb.yellow().to_string(),
        Outcome::Failed(_) => verb.red().bold().to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
