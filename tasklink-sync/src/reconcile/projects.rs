//! Project pass, both directions.

use tasklink_core::types::{
    Change, EntityKind, MirrorProject, ProjectChanges, SourceProject, SourceProjectDraft,
};

use super::Reconciler;
use crate::report::{Direction, EntityReport, Failure, Outcome, SkipReason};
use crate::store::{MirrorStore, SourceStore};

impl<'a, S, M> Reconciler<'a, S, M>
where
    S: SourceStore + ?Sized,
    M: MirrorStore + ?Sized,
{
    /// Push every changed source project into the mirror batch.
    pub fn projects_to_mirror(&mut self, changed: &[SourceProject]) {
        for project in changed {
            self.source_projects
                .insert(project.id.clone(), project.clone());
        }
        for project in changed {
            let outcome = self
                .project_to_mirror(project)
                .unwrap_or_else(Outcome::Failed);
            let mirror_id = self
                .ids
                .mirror_of(EntityKind::Project, &project.id)
                .cloned()
                .or_else(|| project.mirror_id.clone());
            self.report.record(EntityReport {
                kind: EntityKind::Project,
                direction: Direction::ToMirror,
                source_id: Some(project.id.clone()),
                mirror_id,
                label: project.name.clone(),
                outcome,
            });
        }
    }

    fn project_to_mirror(&mut self, project: &SourceProject) -> Result<Outcome, Failure> {
        let known = project
            .mirror_id
            .clone()
            .or_else(|| self.ids.mirror_of(EntityKind::Project, &project.id).cloned());
        let Some(mirror_id) = &known else {
            let temp_id = self.batch.create_project(&project.id, &project.name);
            self.ids.link(EntityKind::Project, &project.id, &temp_id)?;
            self.touch(EntityKind::Project, &temp_id);
            return Ok(Outcome::Created);
        };

        let current = match self.mirror_project(mirror_id)? {
            Some(current) if !current.is_deleted => current,
            _ => {
                return Ok(Outcome::Skipped(
                    self.mark_missing(EntityKind::Project, mirror_id),
                ))
            }
        };
        self.ids.link(EntityKind::Project, &project.id, mirror_id)?;

        if self
            .snapshot
            .changed_since_last_pass(EntityKind::Project, mirror_id)
        {
            return Ok(Outcome::Skipped(SkipReason::ChangedOnBothSides));
        }

        let changes = ProjectChanges {
            name: Change::between(&current.name, &project.name),
        };
        if changes.is_empty() {
            return Ok(Outcome::Unchanged);
        }
        self.batch.update_project(mirror_id, changes);
        self.touch(EntityKind::Project, mirror_id);
        Ok(Outcome::Updated(vec!["update"]))
    }

    /// Bring the source store in line with every project in the mirror
    /// snapshot that this pass has not already written.
    pub fn projects_from_mirror(&mut self) {
        let snapshot = self.snapshot;
        for project in &snapshot.projects {
            let outcome = self
                .project_from_mirror(project)
                .unwrap_or_else(Outcome::Failed);
            let source_id = self
                .ids
                .source_of(EntityKind::Project, &project.id)
                .cloned();
            self.report.record(EntityReport {
                kind: EntityKind::Project,
                direction: Direction::ToSource,
                source_id,
                mirror_id: Some(project.id.clone()),
                label: project.name.clone(),
                outcome,
            });
        }
    }

    fn project_from_mirror(&mut self, project: &MirrorProject) -> Result<Outcome, Failure> {
        if project.is_deleted {
            return Ok(Outcome::Skipped(SkipReason::DeletedInMirror));
        }
        if self.was_touched(EntityKind::Project, &project.id) {
            return Ok(Outcome::Skipped(SkipReason::WrittenThisPass));
        }

        let Some(source_id) = self.resolve_source_project(&project.id)? else {
            let source_id = self.source.create_project(&SourceProjectDraft {
                name: project.name.clone(),
                mirror_id: project.id.clone(),
            })?;
            self.ids.link(EntityKind::Project, &source_id, &project.id)?;
            self.source_projects.insert(
                source_id.clone(),
                SourceProject {
                    id: source_id,
                    mirror_id: Some(project.id.clone()),
                    name: project.name.clone(),
                },
            );
            return Ok(Outcome::Created);
        };

        let Some(current) = self.source_project(&source_id)? else {
            return Ok(Outcome::Skipped(SkipReason::SourceMissing(source_id)));
        };
        let changes = ProjectChanges {
            name: Change::between(&current.name, &project.name),
        };
        if changes.is_empty() {
            return Ok(Outcome::Unchanged);
        }
        self.source.update_project(&source_id, &changes)?;
        self.source_projects.insert(
            source_id,
            SourceProject {
                name: project.name.clone(),
                ..current
            },
        );
        Ok(Outcome::Updated(vec!["update"]))
    }
}
