//! Contracts the engine consumes: the two change-source adapters, the
//! mirror mutation batch, and the cursor store.
//!
//! The engine never sees wire formats. Adapters translate their store's
//! records into the shapes of `tasklink_core::types` and back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tasklink_core::types::{
    CursorState, EntityKind, MirrorId, MirrorProject, MirrorTask, MirrorTaskChanges,
    MirrorTaskDraft, ProjectChanges, SourceId, SourceProject, SourceProjectDraft, SourceTask,
    SourceTaskChanges, SourceTaskDraft, SyncCursor, TaskMove, Watermark,
};

use crate::error::{StoreError, SyncError};

// ---------------------------------------------------------------------------
// Source store (planner)
// ---------------------------------------------------------------------------

/// The planner: change feed by "edited at or after" watermark, mutations
/// applied immediately.
pub trait SourceStore {
    fn changed_projects(&mut self, since: &Watermark) -> Result<Vec<SourceProject>, StoreError>;
    fn changed_tasks(&mut self, since: &Watermark) -> Result<Vec<SourceTask>, StoreError>;

    /// Point lookups; `Ok(None)` when the record is gone.
    fn get_project(&mut self, id: &SourceId) -> Result<Option<SourceProject>, StoreError>;
    fn get_task(&mut self, id: &SourceId) -> Result<Option<SourceTask>, StoreError>;

    /// Lookup by the linkage field embedded in planner records.
    fn find_project_by_mirror(&mut self, id: &MirrorId)
        -> Result<Option<SourceProject>, StoreError>;
    fn find_task_by_mirror(&mut self, id: &MirrorId) -> Result<Option<SourceTask>, StoreError>;

    fn create_project(&mut self, draft: &SourceProjectDraft) -> Result<SourceId, StoreError>;
    fn update_project(&mut self, id: &SourceId, changes: &ProjectChanges)
        -> Result<(), StoreError>;
    fn create_task(&mut self, draft: &SourceTaskDraft) -> Result<SourceId, StoreError>;
    fn update_task(&mut self, id: &SourceId, changes: &SourceTaskChanges)
        -> Result<(), StoreError>;

    /// Write the confirmed mirror id into the planner record's linkage field.
    fn record_mirror_link(
        &mut self,
        kind: EntityKind,
        id: &SourceId,
        mirror: &MirrorId,
    ) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Mirror store (task list service)
// ---------------------------------------------------------------------------

/// Records changed since a cursor, as returned by the mirror's change feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    pub cursor: SyncCursor,
    /// The feed returned everything, not a delta.
    pub full_sync: bool,
    pub projects: Vec<MirrorProject>,
    pub tasks: Vec<MirrorTask>,
}

impl MirrorSnapshot {
    /// Whether `id` changed since the previous cursor. A full sync carries
    /// no change information and answers `false`.
    pub fn changed_since_last_pass(&self, kind: EntityKind, id: &MirrorId) -> bool {
        if self.full_sync {
            return false;
        }
        match kind {
            EntityKind::Project => self.projects.iter().any(|p| &p.id == id),
            EntityKind::Task => self.tasks.iter().any(|t| &t.id == id),
        }
    }
}

/// One queued mirror mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MirrorCommand {
    CreateProject {
        temp_id: MirrorId,
        name: String,
    },
    UpdateProject {
        id: MirrorId,
        changes: ProjectChanges,
    },
    CreateTask {
        temp_id: MirrorId,
        draft: MirrorTaskDraft,
    },
    UpdateTask {
        id: MirrorId,
        changes: MirrorTaskChanges,
    },
    /// `current_project` is where the task lives now; adapters whose move
    /// call needs an explicit destination use it when detaching a parent.
    MoveTask {
        id: MirrorId,
        to: TaskMove,
        current_project: Option<MirrorId>,
    },
    SetTaskDone {
        id: MirrorId,
        done: bool,
    },
}

impl MirrorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            MirrorCommand::CreateProject { .. } => "create_project",
            MirrorCommand::UpdateProject { .. } => "update_project",
            MirrorCommand::CreateTask { .. } => "create_task",
            MirrorCommand::UpdateTask { .. } => "update_task",
            MirrorCommand::MoveTask { .. } => "move_task",
            MirrorCommand::SetTaskDone { .. } => "set_task_done",
        }
    }

    /// Kind and id of the record the command writes. Creates answer with
    /// their temporary id.
    pub fn target(&self) -> (EntityKind, &MirrorId) {
        match self {
            MirrorCommand::CreateProject { temp_id, .. } => (EntityKind::Project, temp_id),
            MirrorCommand::UpdateProject { id, .. } => (EntityKind::Project, id),
            MirrorCommand::CreateTask { temp_id, .. } => (EntityKind::Task, temp_id),
            MirrorCommand::UpdateTask { id, .. }
            | MirrorCommand::MoveTask { id, .. }
            | MirrorCommand::SetTaskDone { id, .. } => (EntityKind::Task, id),
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            MirrorCommand::CreateProject { .. } | MirrorCommand::CreateTask { .. }
        )
    }
}

/// A create whose temporary id still has to be confirmed by the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLink {
    pub kind: EntityKind,
    pub source_id: SourceId,
    pub temp_id: MirrorId,
}

/// Mirror mutations queued during a pass and flushed once at its end.
///
/// Creates hand back a temporary id immediately; later commands in the same
/// batch may reference it (a task created under a project created earlier).
#[derive(Debug, Clone, Default)]
pub struct MirrorBatch {
    commands: Vec<MirrorCommand>,
    pending: Vec<PendingLink>,
}

impl MirrorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_project(&mut self, source_id: &SourceId, name: &str) -> MirrorId {
        let temp_id = new_temp_id();
        self.commands.push(MirrorCommand::CreateProject {
            temp_id: temp_id.clone(),
            name: name.to_owned(),
        });
        self.pending.push(PendingLink {
            kind: EntityKind::Project,
            source_id: source_id.clone(),
            temp_id: temp_id.clone(),
        });
        temp_id
    }

    pub fn update_project(&mut self, id: &MirrorId, changes: ProjectChanges) {
        self.commands.push(MirrorCommand::UpdateProject {
            id: id.clone(),
            changes,
        });
    }

    pub fn create_task(&mut self, source_id: &SourceId, draft: MirrorTaskDraft) -> MirrorId {
        let temp_id = new_temp_id();
        self.commands.push(MirrorCommand::CreateTask {
            temp_id: temp_id.clone(),
            draft,
        });
        self.pending.push(PendingLink {
            kind: EntityKind::Task,
            source_id: source_id.clone(),
            temp_id: temp_id.clone(),
        });
        temp_id
    }

    pub fn update_task(&mut self, id: &MirrorId, changes: MirrorTaskChanges) {
        self.commands.push(MirrorCommand::UpdateTask {
            id: id.clone(),
            changes,
        });
    }

    pub fn move_task(&mut self, id: &MirrorId, to: TaskMove, current_project: Option<MirrorId>) {
        self.commands.push(MirrorCommand::MoveTask {
            id: id.clone(),
            to,
            current_project,
        });
    }

    pub fn set_task_done(&mut self, id: &MirrorId, done: bool) {
        self.commands.push(MirrorCommand::SetTaskDone {
            id: id.clone(),
            done,
        });
    }

    pub fn commands(&self) -> &[MirrorCommand] {
        &self.commands
    }

    pub fn pending_links(&self) -> &[PendingLink] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn new_temp_id() -> MirrorId {
    MirrorId(uuid::Uuid::new_v4().to_string())
}

/// A queued command the mirror refused while applying the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedCommand {
    /// Position of the command in [`MirrorBatch::commands`].
    pub index: usize,
    pub message: String,
}

/// Authoritative result of flushing a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Cursor to persist once the pass completes.
    pub cursor: SyncCursor,
    /// Temporary id → confirmed id for every accepted create.
    pub id_mapping: HashMap<MirrorId, MirrorId>,
    pub rejected: Vec<RejectedCommand>,
    /// Post-mutation state of the records the commit touched.
    pub projects: Vec<MirrorProject>,
    pub tasks: Vec<MirrorTask>,
}

/// The task list service: opaque-cursor change feed, batched mutations.
pub trait MirrorStore {
    fn fetch_changes(&mut self, cursor: &SyncCursor) -> Result<MirrorSnapshot, StoreError>;

    /// Point lookups; `Ok(None)` when the record is gone.
    fn get_project(&mut self, id: &MirrorId) -> Result<Option<MirrorProject>, StoreError>;
    fn get_task(&mut self, id: &MirrorId) -> Result<Option<MirrorTask>, StoreError>;

    /// Flush the batch in one call. Always issued, even for an empty batch,
    /// since it also yields the next cursor.
    fn commit(&mut self, batch: &MirrorBatch, cursor: &SyncCursor)
        -> Result<CommitReceipt, StoreError>;
}

// ---------------------------------------------------------------------------
// Cursor store
// ---------------------------------------------------------------------------

/// Persistence for the three cursor variables between passes.
pub trait CursorStore {
    fn load(&mut self) -> Result<CursorState, SyncError>;
    fn save(&mut self, state: &CursorState) -> Result<(), SyncError>;
}
