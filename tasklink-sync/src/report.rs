//! Typed per-entity outcomes and the pass report they aggregate into.
//!
//! The engine decides, the report records, and recording is the only place
//! a decision gets logged: one line per entity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tasklink_core::types::{CursorState, EntityKind, MirrorId, SourceId};

use crate::error::StoreError;
use crate::identity::IdentityConflict;

/// Which way an entity was being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Planner → task list.
    ToMirror,
    /// Task list → planner.
    ToSource,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToMirror => write!(f, "source->mirror"),
            Direction::ToSource => write!(f, "mirror->source"),
        }
    }
}

/// Why an entity was left alone this pass. Every reason is retried
/// naturally by the next pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Planner task without a project.
    Unfiled,
    /// The task's project has no counterpart yet.
    UnresolvedProject(SourceId),
    /// The linked mirror record no longer exists. It is never recreated.
    MirrorMissing(MirrorId),
    /// The linked planner record no longer exists.
    SourceMissing(SourceId),
    /// Both stores changed the record since the last pass; the reverse
    /// direction, which runs second, applies the mirror's state.
    ChangedOnBothSides,
    /// This pass already wrote the mirror record from the planner.
    WrittenThisPass,
    /// The mirror reports the record as deleted.
    DeletedInMirror,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unfiled => write!(f, "task has no project; move it to a project"),
            SkipReason::UnresolvedProject(id) => write!(f, "project {id} is not mirrored yet"),
            SkipReason::MirrorMissing(id) => write!(f, "mirror record {id} not found"),
            SkipReason::SourceMissing(id) => write!(f, "source record {id} not found"),
            SkipReason::ChangedOnBothSides => {
                write!(f, "changed in both stores; deferred to mirror->source")
            }
            SkipReason::WrittenThisPass => write!(f, "already written this pass"),
            SkipReason::DeletedInMirror => write!(f, "deleted in mirror; not propagated"),
        }
    }
}

/// Why an entity could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Remote(StoreError),
    Identity(IdentityConflict),
    /// The mirror refused a queued command during the commit.
    Rejected(String),
}

impl Failure {
    pub fn label(&self) -> &'static str {
        match self {
            Failure::Remote(e) if e.is_transient() => "transient",
            Failure::Remote(_) => "remote",
            Failure::Identity(_) => "identity_conflict",
            Failure::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Remote(e) => e.fmt(f),
            Failure::Identity(e) => e.fmt(f),
            Failure::Rejected(msg) => write!(f, "rejected by mirror: {msg}"),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Failure::Remote(e)
    }
}

impl From<IdentityConflict> for Failure {
    fn from(e: IdentityConflict) -> Self {
        Failure::Identity(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    /// Names of the operations issued (`update`, `move`, `complete`, …).
    Updated(Vec<&'static str>),
    Unchanged,
    Skipped(SkipReason),
    Failed(Failure),
}

impl Outcome {
    pub fn verb(&self) -> &'static str {
        match self {
            Outcome::Created => "create",
            Outcome::Updated(_) => "update",
            Outcome::Unchanged => "unchanged",
            Outcome::Skipped(_) => "skip",
            Outcome::Failed(_) => "fail",
        }
    }

    /// Whether the record should be looked at again next pass even if
    /// nobody edits it in between.
    pub fn needs_retry(&self) -> bool {
        matches!(
            self,
            Outcome::Failed(Failure::Remote(_) | Failure::Rejected(_))
                | Outcome::Skipped(SkipReason::UnresolvedProject(_))
        )
    }

    /// Operations, skip reason or failure, for display.
    pub fn detail(&self) -> String {
        match self {
            Outcome::Updated(ops) => ops.join(","),
            Outcome::Skipped(reason) => reason.to_string(),
            Outcome::Failed(failure) => format!("{}: {failure}", failure.label()),
            Outcome::Created | Outcome::Unchanged => String::new(),
        }
    }
}

/// One entity decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReport {
    pub kind: EntityKind,
    pub direction: Direction,
    pub source_id: Option<SourceId>,
    pub mirror_id: Option<MirrorId>,
    /// Project name or task title, for humans.
    pub label: String,
    pub outcome: Outcome,
}

impl fmt::Display for EntityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.source_id.as_ref().map_or("-", |s| s.as_str());
        let mirror = self.mirror_id.as_ref().map_or("-", |m| m.as_str());
        write!(
            f,
            "{} {} {:?} [{} {source} / {mirror}] {}",
            self.direction,
            self.kind,
            self.label,
            self.outcome.verb(),
            self.outcome.detail()
        )
    }
}

/// Everything a pass decided, plus what it committed and persisted.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub entries: Vec<EntityReport>,
    /// Mirror commands queued by the pass.
    pub queued_commands: usize,
    /// Mirror commands the commit accepted (0 in dry-run).
    pub committed_commands: usize,
    /// Cursor state written at the end of the pass; `None` in dry-run.
    pub persisted: Option<CursorState>,
}

impl PassReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            dry_run,
            entries: Vec::new(),
            queued_commands: 0,
            committed_commands: 0,
            persisted: None,
        }
    }

    /// Record one decision and log it.
    pub fn record(&mut self, entry: EntityReport) {
        match &entry.outcome {
            Outcome::Created | Outcome::Updated(_) => tracing::info!("{entry}"),
            Outcome::Unchanged => tracing::debug!("{entry}"),
            Outcome::Skipped(SkipReason::WrittenThisPass) => tracing::debug!("{entry}"),
            Outcome::Skipped(_) => tracing::warn!("{entry}"),
            Outcome::Failed(_) => tracing::error!("{entry}"),
        }
        self.entries.push(entry);
    }

    /// Point entries that carry a temporary mirror id at the confirmed one.
    pub fn rebind_mirror_id(&mut self, kind: EntityKind, temp: &MirrorId, confirmed: &MirrorId) {
        for entry in &mut self.entries {
            if entry.kind == kind && entry.mirror_id.as_ref() == Some(temp) {
                entry.mirror_id = Some(confirmed.clone());
            }
        }
    }

    /// Turn the `Created` entry of a create the mirror refused into a failure.
    pub fn fail_create(&mut self, kind: EntityKind, temp: &MirrorId, failure: Failure) {
        let Some(entry) = self.entries.iter_mut().find(|e| {
            e.kind == kind
                && e.direction == Direction::ToMirror
                && e.mirror_id.as_ref() == Some(temp)
        }) else {
            return;
        };
        entry.mirror_id = None;
        entry.outcome = Outcome::Failed(failure);
        tracing::error!("{entry}");
    }

    /// Turn the `Updated` entry of a record into a failure after the mirror
    /// refused one of its commands. Later refusals for the same record only
    /// get logged.
    pub fn fail_update(&mut self, kind: EntityKind, id: &MirrorId, failure: Failure) {
        let Some(entry) = self.entries.iter_mut().find(|e| {
            e.kind == kind
                && e.direction == Direction::ToMirror
                && e.mirror_id.as_ref() == Some(id)
                && matches!(e.outcome, Outcome::Updated(_))
        }) else {
            tracing::error!("{kind} {id}: {failure}");
            return;
        };
        entry.outcome = Outcome::Failed(failure);
        tracing::error!("{entry}");
    }

    /// Records to look at again next pass, by direction.
    pub fn retries(&self) -> impl Iterator<Item = &EntityReport> {
        self.entries.iter().filter(|e| e.outcome.needs_retry())
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Created))
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Updated(_)))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Unchanged))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    /// Entries for one entity in one direction, in decision order.
    pub fn entries_for(&self, kind: EntityKind, direction: Direction) -> impl Iterator<Item = &EntityReport> {
        self.entries
            .iter()
            .filter(move |e| e.kind == kind && e.direction == direction)
    }

    pub fn summary(&self, finished_at: DateTime<Utc>) -> PassSummary {
        PassSummary {
            started_at: self.started_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds().max(0),
            dry_run: self.dry_run,
            created: self.created(),
            updated: self.updated(),
            unchanged: self.unchanged(),
            skipped: self.skipped(),
            failed: self.failed(),
            queued_commands: self.queued_commands,
            committed_commands: self.committed_commands,
            cursor: self
                .persisted
                .as_ref()
                .map(|state| state.mirror_cursor.0.clone()),
        }
    }
}

/// Serializable counters for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub dry_run: bool,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub queued_commands: usize,
    pub committed_commands: usize,
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(outcome: Outcome) -> EntityReport {
        EntityReport {
            kind: EntityKind::Task,
            direction: Direction::ToMirror,
            source_id: Some(SourceId::from("t1")),
            mirror_id: None,
            label: "Buy milk".into(),
            outcome,
        }
    }

    #[test]
    fn counters_follow_outcomes() {
        let mut report = PassReport::new(Utc::now(), false);
        report.record(entry(Outcome::Created));
        report.record(entry(Outcome::Updated(vec!["move"])));
        report.record(entry(Outcome::Skipped(SkipReason::Unfiled)));
        report.record(entry(Outcome::Failed(Failure::Rejected("bad".into()))));
        report.record(entry(Outcome::Unchanged));
        assert_eq!(report.created(), 1);
        assert_eq!(report.updated(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.unchanged(), 1);
        assert_eq!(report.entries_for(EntityKind::Task, Direction::ToMirror).count(), 5);
        assert_eq!(report.entries_for(EntityKind::Project, Direction::ToMirror).count(), 0);
    }

    #[test]
    fn display_carries_reason() {
        let line = entry(Outcome::Skipped(SkipReason::UnresolvedProject(SourceId::from("p9"))))
            .to_string();
        assert!(line.contains("skip"), "{line}");
        assert!(line.contains("p9 is not mirrored yet"), "{line}");
        assert!(line.contains("source->mirror task"), "{line}");
    }

    #[test]
    fn refused_create_becomes_failure() {
        let mut report = PassReport::new(Utc::now(), false);
        report.record(EntityReport {
            mirror_id: Some(MirrorId::from("tmp-1")),
            ..entry(Outcome::Created)
        });
        report.fail_create(
            EntityKind::Task,
            &MirrorId::from("tmp-1"),
            Failure::Rejected("invalid project".into()),
        );
        assert_eq!(report.created(), 0);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.entries[0].mirror_id, None);
    }

    #[test]
    fn refused_update_becomes_failure() {
        let mut report = PassReport::new(Utc::now(), false);
        report.record(EntityReport {
            mirror_id: Some(MirrorId::from("mt1")),
            ..entry(Outcome::Updated(vec!["move", "update"]))
        });
        report.fail_update(
            EntityKind::Task,
            &MirrorId::from("mt1"),
            Failure::Rejected("parent not found".into()),
        );
        report.fail_update(
            EntityKind::Task,
            &MirrorId::from("mt1"),
            Failure::Rejected("second refusal".into()),
        );
        assert_eq!(report.updated(), 0);
        assert_eq!(
            report.entries[0].outcome,
            Outcome::Failed(Failure::Rejected("parent not found".into()))
        );
        assert_eq!(report.retries().count(), 1);
    }

    #[rstest]
    #[case(Outcome::Failed(Failure::Rejected("x".into())), true)]
    #[case(Outcome::Skipped(SkipReason::UnresolvedProject(SourceId::from("p1"))), true)]
    #[case(Outcome::Skipped(SkipReason::MirrorMissing(MirrorId::from("mt1"))), false)]
    #[case(Outcome::Skipped(SkipReason::Unfiled), false)]
    #[case(Outcome::Updated(vec!["update"]), false)]
    fn retryable_outcomes(#[case] outcome: Outcome, #[case] retry: bool) {
        assert_eq!(outcome.needs_retry(), retry);
    }

    #[rstest]
    #[case(Failure::Remote(StoreError::Transient {
        op: "items/get".into(),
        attempts: 4,
        message: "timed out".into(),
    }), "transient")]
    #[case(Failure::Remote(StoreError::Rejected {
        op: "sync".into(),
        status: 403,
        message: "forbidden".into(),
    }), "remote")]
    #[case(Failure::Rejected("invalid project".into()), "rejected")]
    fn failures_are_labelled(#[case] failure: Failure, #[case] label: &str) {
        assert_eq!(failure.label(), label);
    }

    #[test]
    fn outcome_detail_lists_operations() {
        assert_eq!(Outcome::Updated(vec!["update", "move"]).detail(), "update,move");
        assert_eq!(Outcome::Created.detail(), "");
    }
}
