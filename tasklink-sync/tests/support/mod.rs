//! In-memory stores that record every mutation.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};

use tasklink_core::types::{
    Change, CursorState, EntityKind, MirrorId, MirrorProject, MirrorTask, Priority,
    ProjectChanges, SourceId, SourceProject, SourceProjectDraft, SourceTask, SourceTaskChanges,
    SourceTaskDraft, SyncCursor, Watermark,
};
use tasklink_sync::{
    CommitReceipt, CursorStore, MirrorBatch, MirrorCommand, MirrorSnapshot, MirrorStore,
    RejectedCommand, SourceStore, StoreError, SyncError,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    CreateProject(SourceProjectDraft),
    UpdateProject(SourceId, ProjectChanges),
    CreateTask(SourceTaskDraft),
    UpdateTask(SourceId, SourceTaskChanges),
    RecordLink(EntityKind, SourceId, MirrorId),
}

#[derive(Debug, Default)]
pub struct FakeSource {
    pub projects: BTreeMap<SourceId, SourceProject>,
    pub tasks: BTreeMap<SourceId, SourceTask>,
    edited: HashMap<SourceId, DateTime<Utc>>,
    pub calls: Vec<SourceCall>,
    pub lookups: usize,
    next_id: usize,
    /// Point lookups of these ids fail with a transient error.
    pub unreachable: Vec<SourceId>,
    /// Link write-backs for these ids fail.
    pub refuse_links: Vec<SourceId>,
    /// Creates and updates fail with a transient error.
    pub read_only: bool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&mut self, id: &str, name: &str, mirror: Option<&str>) {
        let id = SourceId::from(id);
        self.edited.insert(id.clone(), Utc::now());
        self.projects.insert(
            id.clone(),
            SourceProject {
                id,
                mirror_id: mirror.map(MirrorId::from),
                name: name.into(),
            },
        );
    }

    pub fn add_task(&mut self, task: SourceTask) {
        self.edited.insert(task.id.clone(), Utc::now());
        self.tasks.insert(task.id.clone(), task);
    }

    /// Simulate a user edit in the planner.
    pub fn edit_task(&mut self, id: &str, edit: impl FnOnce(&mut SourceTask)) {
        let id = SourceId::from(id);
        let task = self.tasks.get_mut(&id).expect("task exists");
        edit(task);
        self.edited.insert(id, Utc::now());
    }

    pub fn edit_project(&mut self, id: &str, edit: impl FnOnce(&mut SourceProject)) {
        let id = SourceId::from(id);
        let project = self.projects.get_mut(&id).expect("project exists");
        edit(project);
        self.edited.insert(id, Utc::now());
    }

    /// Pretend nothing was edited after `at`.
    pub fn settle(&mut self, at: DateTime<Utc>) {
        for edited in self.edited.values_mut() {
            *edited = at;
        }
    }

    pub fn writes(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| !matches!(c, SourceCall::RecordLink(..)))
            .count()
    }

    pub fn project(&self, id: &str) -> &SourceProject {
        &self.projects[&SourceId::from(id)]
    }

    pub fn task(&self, id: &str) -> &SourceTask {
        &self.tasks[&SourceId::from(id)]
    }

    pub fn task_by_title(&self, title: &str) -> &SourceTask {
        self.tasks
            .values()
            .find(|t| t.title == title)
            .expect("task with title")
    }

    fn fresh_id(&mut self, prefix: &str) -> SourceId {
        self.next_id += 1;
        SourceId(format!("{prefix}-new-{}", self.next_id))
    }

    fn changed_since(&self, id: &SourceId, since: &Watermark) -> bool {
        self.edited.get(id).is_some_and(|at| *at >= since.0)
    }

    fn check_reachable(&self, id: &SourceId) -> Result<(), StoreError> {
        if self.unreachable.contains(id) {
            return Err(StoreError::Transient {
                op: format!("pages/{id}"),
                attempts: 4,
                message: "timed out".into(),
            });
        }
        Ok(())
    }

    fn check_writable(&self, op: &str) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::Transient {
                op: op.into(),
                attempts: 4,
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }
}

impl SourceStore for FakeSource {
    fn changed_projects(&mut self, since: &Watermark) -> Result<Vec<SourceProject>, StoreError> {
        Ok(self
            .projects
            .values()
            .filter(|p| self.changed_since(&p.id, since))
            .cloned()
            .collect())
    }

    fn changed_tasks(&mut self, since: &Watermark) -> Result<Vec<SourceTask>, StoreError> {
        Ok(self
            .tasks
            .values()
            .filter(|t| self.changed_since(&t.id, since))
            .cloned()
            .collect())
    }

    fn get_project(&mut self, id: &SourceId) -> Result<Option<SourceProject>, StoreError> {
        self.lookups += 1;
        self.check_reachable(id)?;
        Ok(self.projects.get(id).cloned())
    }

    fn get_task(&mut self, id: &SourceId) -> Result<Option<SourceTask>, StoreError> {
        self.lookups += 1;
        self.check_reachable(id)?;
        Ok(self.tasks.get(id).cloned())
    }

    fn find_project_by_mirror(
        &mut self,
        id: &MirrorId,
    ) -> Result<Option<SourceProject>, StoreError> {
        self.lookups += 1;
        Ok(self
            .projects
            .values()
            .find(|p| p.mirror_id.as_ref() == Some(id))
            .cloned())
    }

    fn find_task_by_mirror(&mut self, id: &MirrorId) -> Result<Option<SourceTask>, StoreError> {
        self.lookups += 1;
        Ok(self
            .tasks
            .values()
            .find(|t| t.mirror_id.as_ref() == Some(id))
            .cloned())
    }

    fn create_project(&mut self, draft: &SourceProjectDraft) -> Result<SourceId, StoreError> {
        self.check_writable("pages/create")?;
        self.calls.push(SourceCall::CreateProject(draft.clone()));
        let id = self.fresh_id("p");
        self.edited.insert(id.clone(), Utc::now());
        self.projects.insert(
            id.clone(),
            SourceProject {
                id: id.clone(),
                mirror_id: Some(draft.mirror_id.clone()),
                name: draft.name.clone(),
            },
        );
        Ok(id)
    }

    fn update_project(
        &mut self,
        id: &SourceId,
        changes: &ProjectChanges,
    ) -> Result<(), StoreError> {
        self.check_writable("pages/update")?;
        self.calls
            .push(SourceCall::UpdateProject(id.clone(), changes.clone()));
        let project = self.projects.get_mut(id).ok_or_else(|| StoreError::Rejected {
            op: "pages/update".into(),
            status: 404,
            message: format!("{id} not found"),
        })?;
        if let Change::Set(name) = &changes.name {
            project.name = name.clone();
        }
        self.edited.insert(id.clone(), Utc::now());
        Ok(())
    }

    fn create_task(&mut self, draft: &SourceTaskDraft) -> Result<SourceId, StoreError> {
        self.check_writable("pages/create")?;
        self.calls.push(SourceCall::CreateTask(draft.clone()));
        let id = self.fresh_id("t");
        self.edited.insert(id.clone(), Utc::now());
        self.tasks.insert(
            id.clone(),
            SourceTask {
                id: id.clone(),
                mirror_id: Some(draft.mirror_id.clone()),
                title: draft.title.clone(),
                done: draft.done,
                due_date: draft.due_date,
                priority: Priority::NONE,
                project: draft.project.clone(),
                parent: draft.parent.clone(),
            },
        );
        Ok(id)
    }

    fn update_task(
        &mut self,
        id: &SourceId,
        changes: &SourceTaskChanges,
    ) -> Result<(), StoreError> {
        self.check_writable("pages/update")?;
        self.calls
            .push(SourceCall::UpdateTask(id.clone(), changes.clone()));
        let task = self.tasks.get_mut(id).ok_or_else(|| StoreError::Rejected {
            op: "pages/update".into(),
            status: 404,
            message: format!("{id} not found"),
        })?;
        if let Change::Set(v) = &changes.title {
            task.title = v.clone();
        }
        if let Change::Set(v) = &changes.done {
            task.done = *v;
        }
        if let Change::Set(v) = &changes.due_date {
            task.due_date = *v;
        }
        if let Change::Set(v) = &changes.project {
            task.project = v.clone();
        }
        if let Change::Set(v) = &changes.parent {
            task.parent = v.clone();
        }
        self.edited.insert(id.clone(), Utc::now());
        Ok(())
    }

    fn record_mirror_link(
        &mut self,
        kind: EntityKind,
        id: &SourceId,
        mirror: &MirrorId,
    ) -> Result<(), StoreError> {
        self.calls
            .push(SourceCall::RecordLink(kind, id.clone(), mirror.clone()));
        if self.refuse_links.contains(id) {
            return Err(StoreError::Rejected {
                op: "pages/update".into(),
                status: 409,
                message: format!("{id} is locked"),
            });
        }
        match kind {
            EntityKind::Project => {
                if let Some(p) = self.projects.get_mut(id) {
                    p.mirror_id = Some(mirror.clone());
                }
            }
            EntityKind::Task => {
                if let Some(t) = self.tasks.get_mut(id) {
                    t.mirror_id = Some(mirror.clone());
                }
            }
        }
        self.edited.insert(id.clone(), Utc::now());
        Ok(())
    }
}

pub fn source_task(id: &str, title: &str, project: Option<&str>) -> SourceTask {
    SourceTask {
        id: SourceId::from(id),
        mirror_id: None,
        title: title.into(),
        done: false,
        due_date: None,
        priority: Priority::NONE,
        project: project.map(SourceId::from),
        parent: None,
    }
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

/// Mirror with a change log; cursor `c<n>` means "log entries from n on".
#[derive(Debug, Default)]
pub struct FakeMirror {
    pub projects: BTreeMap<MirrorId, MirrorProject>,
    pub tasks: BTreeMap<MirrorId, MirrorTask>,
    log: Vec<(EntityKind, MirrorId)>,
    next_id: usize,
    /// Every committed batch, empty ones included.
    pub commits: Vec<Vec<MirrorCommand>>,
    pub fail_commit: bool,
    /// Creates with these names/titles are refused.
    pub refuse: Vec<String>,
    pub lookups: usize,
}

impl FakeMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&mut self, id: &str, name: &str) {
        let id = MirrorId::from(id);
        self.log.push((EntityKind::Project, id.clone()));
        self.projects.insert(
            id.clone(),
            MirrorProject {
                id,
                name: name.into(),
                is_deleted: false,
            },
        );
    }

    pub fn add_task(&mut self, task: MirrorTask) {
        self.log.push((EntityKind::Task, task.id.clone()));
        self.tasks.insert(task.id.clone(), task);
    }

    /// Simulate a user edit in the task list.
    pub fn edit_task(&mut self, id: &str, edit: impl FnOnce(&mut MirrorTask)) {
        let id = MirrorId::from(id);
        let task = self.tasks.get_mut(&id).expect("task exists");
        edit(task);
        self.log.push((EntityKind::Task, id));
    }

    pub fn edit_project(&mut self, id: &str, edit: impl FnOnce(&mut MirrorProject)) {
        let id = MirrorId::from(id);
        let project = self.projects.get_mut(&id).expect("project exists");
        edit(project);
        self.log.push((EntityKind::Project, id));
    }

    pub fn cursor(&self) -> SyncCursor {
        SyncCursor(format!("c{}", self.log.len()))
    }

    pub fn last_commit(&self) -> &[MirrorCommand] {
        self.commits.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn task(&self, id: &str) -> &MirrorTask {
        &self.tasks[&MirrorId::from(id)]
    }

    pub fn task_by_title(&self, title: &str) -> &MirrorTask {
        self.tasks
            .values()
            .find(|t| t.title == title)
            .expect("task with title")
    }

    pub fn project_by_name(&self, name: &str) -> &MirrorProject {
        self.projects
            .values()
            .find(|p| p.name == name)
            .expect("project with name")
    }

    fn fresh_id(&mut self, prefix: &str) -> MirrorId {
        self.next_id += 1;
        MirrorId(format!("{prefix}{}", self.next_id))
    }

    fn apply(
        &mut self,
        command: &MirrorCommand,
        mapping: &HashMap<MirrorId, MirrorId>,
    ) -> Result<Option<(MirrorId, MirrorId)>, String> {
        let resolve = |id: &MirrorId| mapping.get(id).cloned().unwrap_or_else(|| id.clone());
        match command {
            MirrorCommand::CreateProject { temp_id, name } => {
                if self.refuse.contains(name) {
                    return Err(format!("refused project {name}"));
                }
                let id = self.fresh_id("mp");
                self.add_project(id.as_str(), name);
                Ok(Some((temp_id.clone(), id)))
            }
            MirrorCommand::UpdateProject { id, changes } => {
                let id = resolve(id);
                let project = self.projects.get_mut(&id).ok_or("project not found")?;
                if let Change::Set(name) = &changes.name {
                    project.name = name.clone();
                }
                self.log.push((EntityKind::Project, id));
                Ok(None)
            }
            MirrorCommand::CreateTask { temp_id, draft } => {
                if self.refuse.contains(&draft.title) {
                    return Err(format!("refused task {}", draft.title));
                }
                let project = resolve(&draft.project);
                if !self.projects.contains_key(&project) {
                    return Err(format!("unknown project {project}"));
                }
                let id = self.fresh_id("mt");
                self.add_task(MirrorTask {
                    id: id.clone(),
                    title: draft.title.clone(),
                    done: false,
                    due_date: draft.due_date,
                    priority: draft.priority,
                    project: Some(project),
                    parent: draft.parent.as_ref().map(resolve),
                    is_deleted: false,
                });
                Ok(Some((temp_id.clone(), id)))
            }
            MirrorCommand::UpdateTask { id, changes } => {
                let id = resolve(id);
                let task = self.tasks.get_mut(&id).ok_or("task not found")?;
                if let Change::Set(v) = &changes.title {
                    task.title = v.clone();
                }
                if let Change::Set(v) = &changes.due_date {
                    task.due_date = *v;
                }
                if let Change::Set(v) = &changes.priority {
                    task.priority = *v;
                }
                self.log.push((EntityKind::Task, id));
                Ok(None)
            }
            MirrorCommand::MoveTask {
                id,
                to,
                current_project,
            } => {
                let id = resolve(id);
                let parent_project = match &to.parent {
                    Change::Set(Some(parent)) => {
                        let parent = resolve(parent);
                        Some(
                            self.tasks
                                .get(&parent)
                                .and_then(|p| p.project.clone())
                                .ok_or("parent not found")?,
                        )
                    }
                    _ => None,
                };
                let task = self.tasks.get_mut(&id).ok_or("task not found")?;
                match (&to.parent, &to.project) {
                    (Change::Set(Some(parent)), _) => {
                        task.parent = Some(resolve(parent));
                        task.project = parent_project;
                    }
                    (Change::Set(None), project) => {
                        task.parent = None;
                        task.project = project
                            .as_set()
                            .map(resolve)
                            .or_else(|| current_project.clone());
                    }
                    (Change::Unchanged, Change::Set(project)) => {
                        task.parent = None;
                        task.project = Some(resolve(project));
                    }
                    (Change::Unchanged, Change::Unchanged) => return Err("empty move".into()),
                }
                self.log.push((EntityKind::Task, id));
                Ok(None)
            }
            MirrorCommand::SetTaskDone { id, done } => {
                let id = resolve(id);
                let task = self.tasks.get_mut(&id).ok_or("task not found")?;
                task.done = *done;
                self.log.push((EntityKind::Task, id));
                Ok(None)
            }
        }
    }
}

impl MirrorStore for FakeMirror {
    fn fetch_changes(&mut self, cursor: &SyncCursor) -> Result<MirrorSnapshot, StoreError> {
        if cursor.is_full_resync() {
            return Ok(MirrorSnapshot {
                cursor: self.cursor(),
                full_sync: true,
                projects: self.projects.values().cloned().collect(),
                tasks: self.tasks.values().cloned().collect(),
            });
        }
        let from: usize = cursor
            .as_str()
            .strip_prefix('c')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| StoreError::Rejected {
                op: "sync".into(),
                status: 400,
                message: format!("invalid sync token {cursor}"),
            })?;
        let mut snapshot = MirrorSnapshot {
            cursor: self.cursor(),
            full_sync: false,
            ..Default::default()
        };
        for (kind, id) in self.log.iter().skip(from) {
            match kind {
                EntityKind::Project => {
                    if !snapshot.projects.iter().any(|p| &p.id == id) {
                        snapshot.projects.push(self.projects[id].clone());
                    }
                }
                EntityKind::Task => {
                    if !snapshot.tasks.iter().any(|t| &t.id == id) {
                        snapshot.tasks.push(self.tasks[id].clone());
                    }
                }
            }
        }
        Ok(snapshot)
    }

    fn get_project(&mut self, id: &MirrorId) -> Result<Option<MirrorProject>, StoreError> {
        self.lookups += 1;
        Ok(self.projects.get(id).filter(|p| !p.is_deleted).cloned())
    }

    fn get_task(&mut self, id: &MirrorId) -> Result<Option<MirrorTask>, StoreError> {
        self.lookups += 1;
        Ok(self.tasks.get(id).filter(|t| !t.is_deleted).cloned())
    }

    fn commit(
        &mut self,
        batch: &MirrorBatch,
        _cursor: &SyncCursor,
    ) -> Result<CommitReceipt, StoreError> {
        if self.fail_commit {
            return Err(StoreError::Transient {
                op: "sync".into(),
                attempts: 4,
                message: "service unavailable".into(),
            });
        }
        self.commits.push(batch.commands().to_vec());
        let mut receipt = CommitReceipt::default();
        for (index, command) in batch.commands().iter().enumerate() {
            match self.apply(command, &receipt.id_mapping) {
                Ok(Some((temp, id))) => {
                    receipt.id_mapping.insert(temp, id);
                }
                Ok(None) => {}
                Err(message) => receipt.rejected.push(RejectedCommand { index, message }),
            }
        }
        receipt.cursor = self.cursor();
        Ok(receipt)
    }
}

pub fn mirror_task(id: &str, title: &str, project: &str) -> MirrorTask {
    MirrorTask {
        id: MirrorId::from(id),
        title: title.into(),
        done: false,
        due_date: None,
        priority: Priority::NONE,
        project: Some(MirrorId::from(project)),
        parent: None,
        is_deleted: false,
    }
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    pub state: CursorState,
    pub saves: usize,
}

impl CursorStore for MemoryCursorStore {
    fn load(&mut self) -> Result<CursorState, SyncError> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &CursorState) -> Result<(), SyncError> {
        self.saves += 1;
        self.state = state.clone();
        Ok(())
    }
}
