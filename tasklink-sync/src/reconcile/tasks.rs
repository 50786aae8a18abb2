//! Task pass, both directions.
//!
//! Completion, hierarchy and plain fields travel as separate mirror
//! commands; a single task may need all three in one pass.

use tasklink_core::types::{
    Change, EntityKind, MirrorId, MirrorTask, MirrorTaskChanges, MirrorTaskDraft, SourceId,
    SourceTask, SourceTaskChanges, SourceTaskDraft, TaskMove,
};

use super::{parents_first, Reconciler};
use crate::report::{Direction, EntityReport, Failure, Outcome, SkipReason};
use crate::store::{MirrorStore, SourceStore};

/// Where a task's parent reference points after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ParentRef<T> {
    /// The task has no parent.
    Root,
    Resolved(T),
    /// The parent has no counterpart yet; the slot is left alone.
    Unresolved,
}

impl<T: Clone> ParentRef<T> {
    /// Value to put in a draft: unresolved parents are simply omitted.
    fn for_create(&self) -> Option<T> {
        match self {
            ParentRef::Resolved(id) => Some(id.clone()),
            ParentRef::Root | ParentRef::Unresolved => None,
        }
    }

    /// Change against the current parent; unresolved leaves it untouched.
    fn change_from(&self, current: &Option<T>) -> Change<Option<T>>
    where
        T: PartialEq,
    {
        match self {
            ParentRef::Root => Change::between(current, &None),
            ParentRef::Resolved(id) => Change::between(current, &Some(id.clone())),
            ParentRef::Unresolved => Change::Unchanged,
        }
    }
}

impl<'a, S, M> Reconciler<'a, S, M>
where
    S: SourceStore + ?Sized,
    M: MirrorStore + ?Sized,
{
    /// Push every changed source task into the mirror batch. Parents are
    /// visited before their sub-tasks so a sub-task can reference a parent
    /// created in the same batch.
    pub fn tasks_to_mirror(&mut self, changed: &[SourceTask]) {
        for task in changed {
            self.source_tasks.insert(task.id.clone(), task.clone());
        }
        for task in parents_first(changed, |t| &t.id, |t| t.parent.as_ref()) {
            let outcome = self.task_to_mirror(task).unwrap_or_else(Outcome::Failed);
            let mirror_id = self
                .ids
                .mirror_of(EntityKind::Task, &task.id)
                .cloned()
                .or_else(|| task.mirror_id.clone());
            self.report.record(EntityReport {
                kind: EntityKind::Task,
                direction: Direction::ToMirror,
                source_id: Some(task.id.clone()),
                mirror_id,
                label: task.title.clone(),
                outcome,
            });
        }
    }

    fn task_to_mirror(&mut self, task: &SourceTask) -> Result<Outcome, Failure> {
        let Some(project) = &task.project else {
            return Ok(Outcome::Skipped(SkipReason::Unfiled));
        };
        let Some(mirror_project) = self.resolve_mirror_project(project)? else {
            return Ok(Outcome::Skipped(SkipReason::UnresolvedProject(
                project.clone(),
            )));
        };
        let parent = self.mirror_parent_of(task);

        let known = task
            .mirror_id
            .clone()
            .or_else(|| self.ids.mirror_of(EntityKind::Task, &task.id).cloned());
        let Some(mirror_id) = &known else {
            let temp_id = self.batch.create_task(
                &task.id,
                MirrorTaskDraft {
                    title: task.title.clone(),
                    due_date: task.due_date,
                    priority: task.priority,
                    project: mirror_project,
                    parent: parent.for_create(),
                },
            );
            self.ids.link(EntityKind::Task, &task.id, &temp_id)?;
            self.touch(EntityKind::Task, &temp_id);
            return Ok(Outcome::Created);
        };

        let current = match self.mirror_task(mirror_id)? {
            Some(current) if !current.is_deleted => current,
            _ => return Ok(Outcome::Skipped(self.mark_missing(EntityKind::Task, mirror_id))),
        };
        self.ids.link(EntityKind::Task, &task.id, mirror_id)?;

        if self
            .snapshot
            .changed_since_last_pass(EntityKind::Task, mirror_id)
        {
            return Ok(Outcome::Skipped(SkipReason::ChangedOnBothSides));
        }

        let mut operations = Vec::new();

        if task.done != current.done {
            self.batch.set_task_done(mirror_id, task.done);
            operations.push(if task.done { "complete" } else { "uncomplete" });
        }

        let to = TaskMove {
            project: if current.project.as_ref() == Some(&mirror_project) {
                Change::Unchanged
            } else {
                Change::Set(mirror_project)
            },
            parent: parent.change_from(&current.parent),
        };
        if !to.is_empty() {
            self.batch.move_task(mirror_id, to, current.project.clone());
            operations.push("move");
        }

        let changes = MirrorTaskChanges {
            title: Change::between(&current.title, &task.title),
            due_date: Change::between(&current.due_date, &task.due_date),
            priority: Change::between(&current.priority, &task.priority),
        };
        if !changes.is_empty() {
            self.batch.update_task(mirror_id, changes);
            operations.push("update");
        }

        if operations.is_empty() {
            return Ok(Outcome::Unchanged);
        }
        self.touch(EntityKind::Task, mirror_id);
        Ok(Outcome::Updated(operations))
    }

    fn mirror_parent_of(&mut self, task: &SourceTask) -> ParentRef<MirrorId> {
        let Some(parent) = &task.parent else {
            return ParentRef::Root;
        };
        match self.resolve_mirror_task(parent) {
            Ok(Some(id)) => ParentRef::Resolved(id),
            Ok(None) => {
                tracing::debug!("task {}: parent {parent} not mirrored yet", task.id);
                ParentRef::Unresolved
            }
            Err(e) => {
                tracing::warn!("task {}: parent {parent} unresolved: {e}", task.id);
                ParentRef::Unresolved
            }
        }
    }

    /// Bring the source store in line with every task in the mirror
    /// snapshot that this pass has not already written.
    pub fn tasks_from_mirror(&mut self) {
        let snapshot = self.snapshot;
        for task in parents_first(&snapshot.tasks, |t| &t.id, |t| t.parent.as_ref()) {
            let outcome = self.task_from_mirror(task).unwrap_or_else(Outcome::Failed);
            let source_id = self.ids.source_of(EntityKind::Task, &task.id).cloned();
            self.report.record(EntityReport {
                kind: EntityKind::Task,
                direction: Direction::ToSource,
                source_id,
                mirror_id: Some(task.id.clone()),
                label: task.title.clone(),
                outcome,
            });
        }
    }

    fn task_from_mirror(&mut self, task: &MirrorTask) -> Result<Outcome, Failure> {
        if task.is_deleted {
            return Ok(Outcome::Skipped(SkipReason::DeletedInMirror));
        }
        if self.was_touched(EntityKind::Task, &task.id) {
            return Ok(Outcome::Skipped(SkipReason::WrittenThisPass));
        }

        let project = match &task.project {
            Some(project) => self.resolve_source_project(project)?,
            None => None,
        };
        let parent = self.source_parent_of(task)?;

        let Some(source_id) = self.resolve_source_task(&task.id)? else {
            if project.is_none() {
                tracing::warn!(
                    "task {} ({:?}): project not in source store, creating it unfiled",
                    task.id,
                    task.title
                );
            }
            let source_id = self.source.create_task(&SourceTaskDraft {
                title: task.title.clone(),
                done: task.done,
                due_date: task.due_date,
                project,
                parent: parent.for_create(),
                mirror_id: task.id.clone(),
            })?;
            self.ids.link(EntityKind::Task, &source_id, &task.id)?;
            return Ok(Outcome::Created);
        };

        let Some(current) = self.source_task(&source_id)? else {
            return Ok(Outcome::Skipped(SkipReason::SourceMissing(source_id)));
        };
        let changes = SourceTaskChanges {
            title: Change::between(&current.title, &task.title),
            done: Change::between(&current.done, &task.done),
            due_date: Change::between(&current.due_date, &task.due_date),
            // An unresolved project keeps the task where it is.
            project: match project {
                Some(project) => Change::between(&current.project, &Some(project)),
                None => Change::Unchanged,
            },
            parent: parent.change_from(&current.parent),
        };
        if changes.is_empty() {
            return Ok(Outcome::Unchanged);
        }
        let operations = changes.changed_fields();
        self.source.update_task(&source_id, &changes)?;
        Ok(Outcome::Updated(operations))
    }

    fn source_parent_of(&mut self, task: &MirrorTask) -> Result<ParentRef<SourceId>, Failure> {
        let Some(parent) = &task.parent else {
            return Ok(ParentRef::Root);
        };
        Ok(match self.resolve_source_task(parent)? {
            Some(id) => ParentRef::Resolved(id),
            None => ParentRef::Unresolved,
        })
    }
}
