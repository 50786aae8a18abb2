//! Shared pass entrypoint used by the CLI and the daemon.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use tasklink_core::types::{
    CursorState, EntityKind, MirrorId, PendingWork, ProjectChanges, SourceId, SourceProject,
    SourceProjectDraft, SourceTask, SourceTaskChanges, SourceTaskDraft, UnrecordedLink,
    Watermark,
};

use crate::dump::write_dump;
use crate::error::{StoreError, SyncError};
use crate::reconcile::Reconciler;
use crate::report::{Direction, PassReport};
use crate::store::{CursorStore, MirrorSnapshot, MirrorStore, SourceStore};

/// Whether a pass writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassMode {
    #[default]
    Live,
    /// Read both stores and decide, but write nothing: source writes are
    /// recorded, the mirror batch is dropped, cursors stay put.
    DryRun,
}

#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    pub mode: PassMode,
    /// Write the mirror snapshot and commit receipt here when set.
    pub dump_dir: Option<PathBuf>,
}

/// Run one reconciliation pass.
///
/// Cursors are loaded at the start and saved only after the mirror commit
/// succeeded and the reverse task direction ran. Any `Err` means nothing
/// was persisted and the next pass covers the same window again.
///
/// Records that failed or were skipped for a missing reference are saved
/// with the cursors and fetched again by id next pass, since the new
/// watermarks lie past their edit times. Links the source store refused to
/// record are written back first.
pub fn run_pass<S, M, C>(
    source: &mut S,
    mirror: &mut M,
    cursors: &mut C,
    options: &PassOptions,
) -> Result<PassReport, SyncError>
where
    S: SourceStore + ?Sized,
    M: MirrorStore + ?Sized,
    C: CursorStore + ?Sized,
{
    let started = Utc::now();
    let state = cursors.load()?;
    tracing::info!(
        "pass started: mirror cursor {}, tasks since {}, projects since {}",
        if state.mirror_cursor.is_full_resync() { "* (full resync)" } else { state.mirror_cursor.as_str() },
        state.task_watermark,
        state.project_watermark
    );

    let report = match options.mode {
        PassMode::Live => {
            let (mut report, next) = reconcile_window(source, mirror, &state, started, options)?;
            if let Some(next) = next {
                cursors.save(&next)?;
                report.persisted = Some(next);
            }
            report
        }
        PassMode::DryRun => {
            let mut dry = DryRunSource::new(source);
            let (report, _) = reconcile_window(&mut dry, mirror, &state, started, options)?;
            tracing::info!(
                "dry run: {} mirror command(s) and {} source write(s) not issued",
                report.queued_commands,
                dry.writes().len()
            );
            report
        }
    };

    tracing::info!(
        "pass finished: {} created, {} updated, {} unchanged, {} skipped, {} failed",
        report.created(),
        report.updated(),
        report.unchanged(),
        report.skipped(),
        report.failed()
    );
    Ok(report)
}

/// Fetch, decide, and in live mode commit. Returns the cursor state to
/// persist, which is `None` in dry-run.
fn reconcile_window<S, M>(
    source: &mut S,
    mirror: &mut M,
    state: &CursorState,
    started: DateTime<Utc>,
    options: &PassOptions,
) -> Result<(PassReport, Option<CursorState>), SyncError>
where
    S: SourceStore + ?Sized,
    M: MirrorStore + ?Sized,
{
    let live = options.mode == PassMode::Live;
    let mut carried = PendingWork::default();
    carried.unrecorded_links = record_links(source, &state.pending.unrecorded_links);

    let mut projects = source
        .changed_projects(&state.project_watermark)
        .map_err(|source| SyncError::Fetch {
            what: "source projects",
            source,
        })?;
    let mut tasks = source
        .changed_tasks(&state.task_watermark)
        .map_err(|source| SyncError::Fetch {
            what: "source tasks",
            source,
        })?;
    let mut snapshot = mirror
        .fetch_changes(&state.mirror_cursor)
        .map_err(|source| SyncError::Fetch {
            what: "mirror changes",
            source,
        })?;
    refetch_source(source, &state.pending, &mut projects, &mut tasks, &mut carried);
    refetch_mirror(mirror, &state.pending, &mut snapshot, &mut carried);
    tracing::info!(
        "fetched {} source project(s), {} source task(s), {} mirror project(s), {} mirror task(s){}",
        projects.len(),
        tasks.len(),
        snapshot.projects.len(),
        snapshot.tasks.len(),
        if snapshot.full_sync { " (full sync)" } else { "" }
    );
    dump(options, started, "snapshot", &snapshot);

    let mut rec = Reconciler::new(source, mirror, &snapshot, PassReport::new(started, !live));
    rec.assume_links(&carried.unrecorded_links);
    rec.projects_to_mirror(&projects);
    rec.projects_from_mirror();
    rec.tasks_to_mirror(&tasks);

    let receipt = if live {
        let receipt = rec.commit(&snapshot.cursor).map_err(SyncError::Commit)?;
        dump(options, started, "receipt", &receipt);
        Some(receipt)
    } else {
        None
    };

    rec.tasks_from_mirror();
    carried.unrecorded_links.extend_from_slice(rec.unrecorded_links());
    let report = rec.into_report();

    let Some(receipt) = receipt else {
        return Ok((report, None));
    };
    for entry in report.retries() {
        match (entry.direction, &entry.source_id, &entry.mirror_id) {
            (Direction::ToMirror, Some(id), _) => carried.retry(entry.kind, id),
            (Direction::ToSource, _, Some(id)) => carried.retry_mirror(entry.kind, id),
            _ => {}
        }
    }
    if !carried.is_empty() {
        tracing::info!(
            "carrying {} project(s), {} task(s), {} mirror record(s) and {} link(s) to the next pass",
            carried.retry_projects.len(),
            carried.retry_tasks.len(),
            carried.retry_mirror_projects.len() + carried.retry_mirror_tasks.len(),
            carried.unrecorded_links.len()
        );
    }
    let next = CursorState::advanced(receipt.cursor, started).with_pending(carried);
    Ok((report, Some(next)))
}

/// Write back links an earlier pass could not record. Returns the ones
/// that still failed.
fn record_links<S>(source: &mut S, links: &[UnrecordedLink]) -> Vec<UnrecordedLink>
where
    S: SourceStore + ?Sized,
{
    let mut failed = Vec::new();
    for link in links {
        match source.record_mirror_link(link.kind, &link.source_id, &link.mirror_id) {
            Ok(()) => tracing::info!(
                "recorded {} link {} -> {}",
                link.kind,
                link.source_id,
                link.mirror_id
            ),
            Err(e) => {
                tracing::warn!(
                    "still unable to record {} link {} -> {}: {e}",
                    link.kind,
                    link.source_id,
                    link.mirror_id
                );
                failed.push(link.clone());
            }
        }
    }
    failed
}

/// Add the source records queued for retry to the fetched deltas. Records
/// that cannot be fetched stay queued; deleted ones are dropped.
fn refetch_source<S>(
    source: &mut S,
    pending: &PendingWork,
    projects: &mut Vec<SourceProject>,
    tasks: &mut Vec<SourceTask>,
    carried: &mut PendingWork,
) where
    S: SourceStore + ?Sized,
{
    for id in pending.retries(EntityKind::Project) {
        if projects.iter().any(|p| &p.id == id) {
            continue;
        }
        match source.get_project(id) {
            Ok(Some(project)) => projects.push(project),
            Ok(None) => tracing::debug!("retry of project {id} dropped: gone from source"),
            Err(e) => {
                tracing::warn!("retry of project {id} postponed: {e}");
                carried.retry(EntityKind::Project, id);
            }
        }
    }
    for id in pending.retries(EntityKind::Task) {
        if tasks.iter().any(|t| &t.id == id) {
            continue;
        }
        match source.get_task(id) {
            Ok(Some(task)) => tasks.push(task),
            Ok(None) => tracing::debug!("retry of task {id} dropped: gone from source"),
            Err(e) => {
                tracing::warn!("retry of task {id} postponed: {e}");
                carried.retry(EntityKind::Task, id);
            }
        }
    }
}

/// Add the mirror records queued for retry to the snapshot.
fn refetch_mirror<M>(
    mirror: &mut M,
    pending: &PendingWork,
    snapshot: &mut MirrorSnapshot,
    carried: &mut PendingWork,
) where
    M: MirrorStore + ?Sized,
{
    for id in pending.mirror_retries(EntityKind::Project) {
        if snapshot.projects.iter().any(|p| &p.id == id) {
            continue;
        }
        match mirror.get_project(id) {
            Ok(Some(project)) => snapshot.projects.push(project),
            Ok(None) => tracing::debug!("retry of mirror project {id} dropped: gone"),
            Err(e) => {
                tracing::warn!("retry of mirror project {id} postponed: {e}");
                carried.retry_mirror(EntityKind::Project, id);
            }
        }
    }
    for id in pending.mirror_retries(EntityKind::Task) {
        if snapshot.tasks.iter().any(|t| &t.id == id) {
            continue;
        }
        match mirror.get_task(id) {
            Ok(Some(task)) => snapshot.tasks.push(task),
            Ok(None) => tracing::debug!("retry of mirror task {id} dropped: gone"),
            Err(e) => {
                tracing::warn!("retry of mirror task {id} postponed: {e}");
                carried.retry_mirror(EntityKind::Task, id);
            }
        }
    }
}

fn dump<T: serde::Serialize>(
    options: &PassOptions,
    started: DateTime<Utc>,
    name: &str,
    value: &T,
) {
    let Some(dir) = &options.dump_dir else {
        return;
    };
    match write_dump(dir, started, name, value) {
        Ok(path) => tracing::debug!("wrote {name} dump to {}", path.display()),
        Err(e) => tracing::warn!("failed to write {name} dump: {e}"),
    }
}

/// A source write that a dry run recorded instead of issuing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunWrite {
    CreateProject(SourceProjectDraft),
    UpdateProject(SourceId, ProjectChanges),
    CreateTask(SourceTaskDraft),
    UpdateTask(SourceId, SourceTaskChanges),
    RecordLink(EntityKind, SourceId, MirrorId),
}

/// Source store wrapper that forwards reads and records writes.
///
/// Creates answer with synthetic ids so the rest of the pass can link them.
pub struct DryRunSource<'a, S: ?Sized> {
    inner: &'a mut S,
    writes: Vec<DryRunWrite>,
}

impl<'a, S: ?Sized> DryRunSource<'a, S> {
    pub fn new(inner: &'a mut S) -> Self {
        Self {
            inner,
            writes: Vec::new(),
        }
    }

    pub fn writes(&self) -> &[DryRunWrite] {
        &self.writes
    }

    fn synthetic_id(&self) -> SourceId {
        SourceId(format!("dry-run-{}", self.writes.len() + 1))
    }
}

impl<S: SourceStore + ?Sized> SourceStore for DryRunSource<'_, S> {
    fn changed_projects(&mut self, since: &Watermark) -> Result<Vec<SourceProject>, StoreError> {
        self.inner.changed_projects(since)
    }

    fn changed_tasks(&mut self, since: &Watermark) -> Result<Vec<SourceTask>, StoreError> {
        self.inner.changed_tasks(since)
    }

    fn get_project(&mut self, id: &SourceId) -> Result<Option<SourceProject>, StoreError> {
        self.inner.get_project(id)
    }

    fn get_task(&mut self, id: &SourceId) -> Result<Option<SourceTask>, StoreError> {
        self.inner.get_task(id)
    }

    fn find_project_by_mirror(
        &mut self,
        id: &MirrorId,
    ) -> Result<Option<SourceProject>, StoreError> {
        self.inner.find_project_by_mirror(id)
    }

    fn find_task_by_mirror(&mut self, id: &MirrorId) -> Result<Option<SourceTask>, StoreError> {
        self.inner.find_task_by_mirror(id)
    }

    fn create_project(&mut self, draft: &SourceProjectDraft) -> Result<SourceId, StoreError> {
        let id = self.synthetic_id();
        self.writes.push(DryRunWrite::CreateProject(draft.clone()));
        Ok(id)
    }

    fn update_project(
        &mut self,
        id: &SourceId,
        changes: &ProjectChanges,
    ) -> Result<(), StoreError> {
        self.writes
            .push(DryRunWrite::UpdateProject(id.clone(), changes.clone()));
        Ok(())
    }

    fn create_task(&mut self, draft: &SourceTaskDraft) -> Result<SourceId, StoreError> {
        let id = self.synthetic_id();
        self.writes.push(DryRunWrite::CreateTask(draft.clone()));
        Ok(id)
    }

    fn update_task(
        &mut self,
        id: &SourceId,
        changes: &SourceTaskChanges,
    ) -> Result<(), StoreError> {
        self.writes
            .push(DryRunWrite::UpdateTask(id.clone(), changes.clone()));
        Ok(())
    }

    fn record_mirror_link(
        &mut self,
        kind: EntityKind,
        id: &SourceId,
        mirror: &MirrorId,
    ) -> Result<(), StoreError> {
        self.writes
            .push(DryRunWrite::RecordLink(kind, id.clone(), mirror.clone()));
        Ok(())
    }
}
