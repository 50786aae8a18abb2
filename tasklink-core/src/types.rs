//! Domain types shared by the reconciliation engine and the store adapters.
//!
//! "Source" always names the planner store (store A) and "mirror" always
//! names the task list service (store B), whichever direction a pass is
//! running in. Records are plain data; the adapters own the wire shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a record in the planner store (store A).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a record in the task list store (store B).
///
/// Inside an uncommitted mirror batch this may be a temporary id; the
/// commit receipt maps it to the confirmed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MirrorId(pub String);

impl MirrorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MirrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for MirrorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MirrorId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The two linked entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Task,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Project => write!(f, "project"),
            EntityKind::Task => write!(f, "task"),
        }
    }
}

/// Task priority on the mirror's 1–4 scale, 1 meaning "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const NONE: Priority = Priority(1);
    pub const LOW: Priority = Priority(2);
    pub const MEDIUM: Priority = Priority(3);
    pub const HIGH: Priority = Priority(4);

    /// Returns `None` outside `1..=4`.
    pub fn new(value: u8) -> Option<Self> {
        (1..=4).contains(&value).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NONE
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or_else(|| format!("priority {value} outside 1..=4"))
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Field-change values
// ---------------------------------------------------------------------------

/// One possibly-updated attribute: either left alone or set to a value.
///
/// `Set` carries falsy values (`false`, `None`, empty strings) like any
/// other; only `Unchanged` is omitted from an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change<T> {
    Unchanged,
    Set(T),
}

impl<T> Default for Change<T> {
    fn default() -> Self {
        Change::Unchanged
    }
}

impl<T: PartialEq + Clone> Change<T> {
    /// `Set(desired)` when `desired` differs from `current`.
    pub fn between(current: &T, desired: &T) -> Self {
        if current == desired {
            Change::Unchanged
        } else {
            Change::Set(desired.clone())
        }
    }
}

impl<T> Change<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Change::Set(_))
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Change::Set(value) => Some(value),
            Change::Unchanged => None,
        }
    }

    pub fn into_set(self) -> Option<T> {
        match self {
            Change::Set(value) => Some(value),
            Change::Unchanged => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A project as stored in the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProject {
    pub id: SourceId,
    /// Linkage field embedded in the planner record; `None` until mirrored.
    pub mirror_id: Option<MirrorId>,
    pub name: String,
}

/// A project as stored in the task list service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorProject {
    pub id: MirrorId,
    pub name: String,
    #[serde(default)]
    pub is_deleted: bool,
}

/// A task as stored in the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTask {
    pub id: SourceId,
    pub mirror_id: Option<MirrorId>,
    pub title: String,
    pub done: bool,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub project: Option<SourceId>,
    pub parent: Option<SourceId>,
}

/// A task as stored in the task list service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorTask {
    pub id: MirrorId,
    pub title: String,
    pub done: bool,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub project: Option<MirrorId>,
    pub parent: Option<MirrorId>,
    #[serde(default)]
    pub is_deleted: bool,
}

// ---------------------------------------------------------------------------
// Change sets and drafts
// ---------------------------------------------------------------------------

/// Project fields that may be pushed to either store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectChanges {
    pub name: Change<String>,
}

impl ProjectChanges {
    pub fn is_empty(&self) -> bool {
        !self.name.is_set()
    }
}

/// Plain field update for a mirror task. Completion and hierarchy travel
/// in their own commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorTaskChanges {
    pub title: Change<String>,
    pub due_date: Change<Option<NaiveDate>>,
    pub priority: Change<Priority>,
}

impl MirrorTaskChanges {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_set() {
            fields.push("title");
        }
        if self.due_date.is_set() {
            fields.push("due_date");
        }
        if self.priority.is_set() {
            fields.push("priority");
        }
        fields
    }
}

/// Hierarchy move for a mirror task. Only the slots that changed are set.
///
/// `parent: Set(None)` detaches the task to its project's root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMove {
    pub project: Change<MirrorId>,
    pub parent: Change<Option<MirrorId>>,
}

impl TaskMove {
    pub fn is_empty(&self) -> bool {
        !self.project.is_set() && !self.parent.is_set()
    }
}

/// Field update for a planner task. Priority is never written back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTaskChanges {
    pub title: Change<String>,
    pub done: Change<bool>,
    pub due_date: Change<Option<NaiveDate>>,
    pub project: Change<Option<SourceId>>,
    pub parent: Change<Option<SourceId>>,
}

impl SourceTaskChanges {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_set() {
            fields.push("title");
        }
        if self.done.is_set() {
            fields.push("done");
        }
        if self.due_date.is_set() {
            fields.push("due_date");
        }
        if self.project.is_set() {
            fields.push("project");
        }
        if self.parent.is_set() {
            fields.push("parent");
        }
        fields
    }
}

/// Everything needed to create a mirror task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorTaskDraft {
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub project: MirrorId,
    pub parent: Option<MirrorId>,
}

/// A planner project to create for a mirror-only project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProjectDraft {
    pub name: String,
    pub mirror_id: MirrorId,
}

/// A planner task to create for a mirror-only task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTaskDraft {
    pub title: String,
    pub done: bool,
    pub due_date: Option<NaiveDate>,
    pub project: Option<SourceId>,
    pub parent: Option<SourceId>,
    pub mirror_id: MirrorId,
}

// ---------------------------------------------------------------------------
// Cursor state
// ---------------------------------------------------------------------------

/// Opaque change-feed token of the task list service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(pub String);

impl SyncCursor {
    /// Token requesting a full resync.
    pub const FULL_RESYNC: &'static str = "*";

    pub fn full_resync() -> Self {
        Self(Self::FULL_RESYNC.to_owned())
    }

    pub fn is_full_resync(&self) -> bool {
        self.0 == Self::FULL_RESYNC
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self::full_resync()
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// "Edited at or after" boundary for the planner's change filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(pub DateTime<Utc>);

impl Watermark {
    /// Boundary that matches every record.
    pub fn beginning() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Planner edit times have minute precision, so watermarks are floored
    /// to the minute.
    pub fn floor_to_minute(at: DateTime<Utc>) -> Self {
        let floored = at
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at);
        Self(floored)
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::beginning()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl FromStr for Watermark {
    type Err = chrono::ParseError;

    /// Accepts RFC 3339, and naive ISO timestamps (read as UTC) written by
    /// older tooling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => Ok(Self(dt.with_timezone(&Utc))),
            Err(rfc_err) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| Self(naive.and_utc()))
                .map_err(|_| rfc_err),
        }
    }
}

/// A confirmed mirror id that could not be written into the planner record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrecordedLink {
    pub kind: EntityKind,
    pub source_id: SourceId,
    pub mirror_id: MirrorId,
}

/// Work a pass left behind for the next one. The watermarks move past
/// these records, so they are fetched again by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWork {
    /// Planner projects whose last reconciliation failed or was skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_projects: Vec<SourceId>,
    /// Planner tasks whose last reconciliation failed or was skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_tasks: Vec<SourceId>,
    /// Mirror projects whose pull into the planner failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_mirror_projects: Vec<MirrorId>,
    /// Mirror tasks whose pull into the planner failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_mirror_tasks: Vec<MirrorId>,
    /// Links to write back before anything else happens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrecorded_links: Vec<UnrecordedLink>,
}

impl PendingWork {
    pub fn is_empty(&self) -> bool {
        self.retry_projects.is_empty()
            && self.retry_tasks.is_empty()
            && self.retry_mirror_projects.is_empty()
            && self.retry_mirror_tasks.is_empty()
            && self.unrecorded_links.is_empty()
    }

    /// Queue a planner record for another attempt; duplicates are ignored.
    pub fn retry(&mut self, kind: EntityKind, id: &SourceId) {
        let list = match kind {
            EntityKind::Project => &mut self.retry_projects,
            EntityKind::Task => &mut self.retry_tasks,
        };
        push_unique(list, id);
    }

    /// Queue a mirror record for another attempt; duplicates are ignored.
    pub fn retry_mirror(&mut self, kind: EntityKind, id: &MirrorId) {
        let list = match kind {
            EntityKind::Project => &mut self.retry_mirror_projects,
            EntityKind::Task => &mut self.retry_mirror_tasks,
        };
        push_unique(list, id);
    }

    pub fn retries(&self, kind: EntityKind) -> &[SourceId] {
        match kind {
            EntityKind::Project => &self.retry_projects,
            EntityKind::Task => &self.retry_tasks,
        }
    }

    pub fn mirror_retries(&self, kind: EntityKind) -> &[MirrorId] {
        match kind {
            EntityKind::Project => &self.retry_mirror_projects,
            EntityKind::Task => &self.retry_mirror_tasks,
        }
    }

    /// The unrecorded link of a planner record, if any.
    pub fn link_of(&self, kind: EntityKind, id: &SourceId) -> Option<&MirrorId> {
        self.unrecorded_links
            .iter()
            .find(|l| l.kind == kind && &l.source_id == id)
            .map(|l| &l.mirror_id)
    }
}

fn push_unique<T: PartialEq + Clone>(list: &mut Vec<T>, item: &T) {
    if !list.contains(item) {
        list.push(item.clone());
    }
}

/// The three persisted change-feed positions, plus the work carried over
/// from the pass that wrote them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub mirror_cursor: SyncCursor,
    pub task_watermark: Watermark,
    pub project_watermark: Watermark,
    #[serde(default, skip_serializing_if = "PendingWork::is_empty")]
    pub pending: PendingWork,
}

impl CursorState {
    /// State that makes the next pass a full resync of both stores.
    pub fn initial() -> Self {
        Self::default()
    }

    /// State to persist after a successful pass that started at `pass_started`.
    pub fn advanced(next_cursor: SyncCursor, pass_started: DateTime<Utc>) -> Self {
        let watermark = Watermark::floor_to_minute(pass_started);
        Self {
            mirror_cursor: next_cursor,
            task_watermark: watermark,
            project_watermark: watermark,
            pending: PendingWork::default(),
        }
    }

    pub fn with_pending(mut self, pending: PendingWork) -> Self {
        self.pending = pending;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
