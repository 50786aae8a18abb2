//! Reconciliation engine.
//!
//! One [`Reconciler`] lives for one pass. It owns the identity map, the
//! mirror batch and the pass report, and borrows both stores. The pipeline
//! drives it in a fixed order:
//!
//! 1. projects source → mirror
//! 2. projects mirror → source
//! 3. tasks source → mirror
//! 4. batch commit and temporary-id confirmation
//! 5. tasks mirror → source
//!
//! Each step consults the identity map filled by the steps before it, so a
//! task always sees the projects (and parent tasks) linked earlier in the
//! same pass.

mod projects;
mod tasks;

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use tasklink_core::types::{
    EntityKind, MirrorId, MirrorProject, MirrorTask, SourceId, SourceProject, SourceTask,
    SyncCursor, UnrecordedLink,
};

use crate::error::StoreError;
use crate::identity::IdentityMap;
use crate::report::{Failure, PassReport, SkipReason};
use crate::store::{CommitReceipt, MirrorBatch, MirrorSnapshot, MirrorStore, SourceStore};

pub struct Reconciler<'a, S: ?Sized, M: ?Sized> {
    source: &'a mut S,
    mirror: &'a mut M,
    snapshot: &'a MirrorSnapshot,
    ids: IdentityMap,
    batch: MirrorBatch,
    report: PassReport,
    /// Mirror records written by the source → mirror direction this pass.
    touched: HashSet<(EntityKind, MirrorId)>,
    /// Linked mirror records found deleted; references to them stay unresolved.
    missing: HashSet<(EntityKind, MirrorId)>,
    unrecorded: Vec<UnrecordedLink>,
    source_projects: HashMap<SourceId, SourceProject>,
    source_tasks: HashMap<SourceId, SourceTask>,
    mirror_projects: HashMap<MirrorId, MirrorProject>,
    mirror_tasks: HashMap<MirrorId, MirrorTask>,
}

impl<'a, S, M> Reconciler<'a, S, M>
where
    S: SourceStore + ?Sized,
    M: MirrorStore + ?Sized,
{
    pub fn new(
        source: &'a mut S,
        mirror: &'a mut M,
        snapshot: &'a MirrorSnapshot,
        report: PassReport,
    ) -> Self {
        let mirror_projects = snapshot
            .projects
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        let mirror_tasks = snapshot
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.clone()))
            .collect();
        Self {
            source,
            mirror,
            snapshot,
            ids: IdentityMap::new(),
            batch: MirrorBatch::new(),
            report,
            touched: HashSet::new(),
            missing: HashSet::new(),
            unrecorded: Vec::new(),
            source_projects: HashMap::new(),
            source_tasks: HashMap::new(),
            mirror_projects,
            mirror_tasks,
        }
    }

    pub fn ids(&self) -> &IdentityMap {
        &self.ids
    }

    pub fn batch(&self) -> &MirrorBatch {
        &self.batch
    }

    pub fn report(&self) -> &PassReport {
        &self.report
    }

    pub fn into_report(self) -> PassReport {
        let mut report = self.report;
        report.queued_commands = self.batch.len();
        report
    }

    /// Flush the queued mirror commands and confirm the temporary ids they
    /// introduced. A failed flush is returned untouched; the caller must
    /// not advance any cursor after it.
    pub fn commit(&mut self, cursor: &SyncCursor) -> Result<CommitReceipt, StoreError> {
        let receipt = self.mirror.commit(&self.batch, cursor)?;
        self.report.committed_commands = self.batch.len().saturating_sub(receipt.rejected.len());
        self.confirm(&receipt);
        Ok(receipt)
    }

    /// Apply a commit receipt: refused commands turn their entry into a
    /// failure, accepted creates are rebound to their confirmed id and the
    /// link is written back into the source record. Write-backs that fail
    /// are kept in [`Reconciler::unrecorded_links`].
    fn confirm(&mut self, receipt: &CommitReceipt) {
        let mut refused: HashMap<MirrorId, String> = HashMap::new();
        for rejected in &receipt.rejected {
            let Some(command) = self.batch.commands().get(rejected.index) else {
                tracing::error!(
                    "mirror refused unknown command {}: {}",
                    rejected.index,
                    rejected.message
                );
                continue;
            };
            let (kind, id) = command.target();
            if command.is_create() {
                refused.insert(id.clone(), rejected.message.clone());
            } else {
                tracing::debug!(
                    "mirror refused {} (command {}): {}",
                    command.name(),
                    rejected.index,
                    rejected.message
                );
                let id = id.clone();
                self.report
                    .fail_update(kind, &id, Failure::Rejected(rejected.message.clone()));
            }
        }

        let pending = self.batch.pending_links().to_vec();
        for link in pending {
            let confirmed = receipt.id_mapping.get(&link.temp_id);
            let Some(confirmed) = confirmed.filter(|_| !refused.contains_key(&link.temp_id)) else {
                let message = refused
                    .remove(&link.temp_id)
                    .unwrap_or_else(|| "no id confirmed for create".to_owned());
                self.ids.unlink_mirror(link.kind, &link.temp_id);
                self.report
                    .fail_create(link.kind, &link.temp_id, Failure::Rejected(message));
                continue;
            };

            self.ids.confirm(link.kind, &link.temp_id, confirmed);
            self.report.rebind_mirror_id(link.kind, &link.temp_id, confirmed);
            self.touched.insert((link.kind, confirmed.clone()));
            if let Err(e) = self
                .source
                .record_mirror_link(link.kind, &link.source_id, confirmed)
            {
                tracing::error!(
                    "failed to record {} link {} -> {}, retrying next pass: {e}",
                    link.kind,
                    link.source_id,
                    confirmed
                );
                self.unrecorded.push(UnrecordedLink {
                    kind: link.kind,
                    source_id: link.source_id.clone(),
                    mirror_id: confirmed.clone(),
                });
            }
        }
    }

    /// Links the commit confirmed but the source store did not record.
    pub fn unrecorded_links(&self) -> &[UnrecordedLink] {
        &self.unrecorded
    }

    /// Treat links a previous pass could not write back as known, so the
    /// records they cover are updated rather than created again.
    pub fn assume_links(&mut self, links: &[UnrecordedLink]) {
        for link in links {
            if let Err(e) = self.ids.link(link.kind, &link.source_id, &link.mirror_id) {
                tracing::warn!("ignoring unrecorded link: {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cached lookups
    // -----------------------------------------------------------------------

    fn mirror_project(&mut self, id: &MirrorId) -> Result<Option<MirrorProject>, StoreError> {
        if let Some(project) = self.mirror_projects.get(id) {
            return Ok(Some(project.clone()));
        }
        let fetched = self.mirror.get_project(id)?;
        if let Some(project) = &fetched {
            self.mirror_projects.insert(id.clone(), project.clone());
        }
        Ok(fetched)
    }

    fn mirror_task(&mut self, id: &MirrorId) -> Result<Option<MirrorTask>, StoreError> {
        if let Some(task) = self.mirror_tasks.get(id) {
            return Ok(Some(task.clone()));
        }
        let fetched = self.mirror.get_task(id)?;
        if let Some(task) = &fetched {
            self.mirror_tasks.insert(id.clone(), task.clone());
        }
        Ok(fetched)
    }

    fn source_project(&mut self, id: &SourceId) -> Result<Option<SourceProject>, StoreError> {
        if let Some(project) = self.source_projects.get(id) {
            return Ok(Some(project.clone()));
        }
        let fetched = self.source.get_project(id)?;
        if let Some(project) = &fetched {
            self.source_projects.insert(id.clone(), project.clone());
        }
        Ok(fetched)
    }

    fn source_task(&mut self, id: &SourceId) -> Result<Option<SourceTask>, StoreError> {
        if let Some(task) = self.source_tasks.get(id) {
            return Ok(Some(task.clone()));
        }
        let fetched = self.source.get_task(id)?;
        if let Some(task) = &fetched {
            self.source_tasks.insert(id.clone(), task.clone());
        }
        Ok(fetched)
    }

    // -----------------------------------------------------------------------
    // Reference resolution (identity map first, then the owning store)
    // -----------------------------------------------------------------------

    /// Mirror id of a source project, falling back to a point lookup of the
    /// project when the map has not seen it.
    fn resolve_mirror_project(&mut self, id: &SourceId) -> Result<Option<MirrorId>, Failure> {
        if let Some(mirror) = self.ids.mirror_of(EntityKind::Project, id) {
            return Ok(Some(mirror.clone()));
        }
        let Some(project) = self.source_project(id)? else {
            return Ok(None);
        };
        let Some(mirror) = project.mirror_id else {
            return Ok(None);
        };
        if self.missing.contains(&(EntityKind::Project, mirror.clone())) {
            return Ok(None);
        }
        self.ids.link(EntityKind::Project, id, &mirror)?;
        Ok(Some(mirror))
    }

    fn resolve_mirror_task(&mut self, id: &SourceId) -> Result<Option<MirrorId>, Failure> {
        if let Some(mirror) = self.ids.mirror_of(EntityKind::Task, id) {
            return Ok(Some(mirror.clone()));
        }
        let Some(task) = self.source_task(id)? else {
            return Ok(None);
        };
        let Some(mirror) = task.mirror_id else {
            return Ok(None);
        };
        if self.missing.contains(&(EntityKind::Task, mirror.clone())) {
            return Ok(None);
        }
        self.ids.link(EntityKind::Task, id, &mirror)?;
        Ok(Some(mirror))
    }

    /// Source id of a mirror project, falling back to a lookup by the
    /// linkage field.
    fn resolve_source_project(&mut self, id: &MirrorId) -> Result<Option<SourceId>, Failure> {
        if let Some(source) = self.ids.source_of(EntityKind::Project, id) {
            return Ok(Some(source.clone()));
        }
        let Some(project) = self.source.find_project_by_mirror(id)? else {
            return Ok(None);
        };
        self.ids.link(EntityKind::Project, &project.id, id)?;
        let source = project.id.clone();
        self.source_projects.insert(source.clone(), project);
        Ok(Some(source))
    }

    fn resolve_source_task(&mut self, id: &MirrorId) -> Result<Option<SourceId>, Failure> {
        if let Some(source) = self.ids.source_of(EntityKind::Task, id) {
            return Ok(Some(source.clone()));
        }
        let Some(task) = self.source.find_task_by_mirror(id)? else {
            return Ok(None);
        };
        self.ids.link(EntityKind::Task, &task.id, id)?;
        let source = task.id.clone();
        self.source_tasks.insert(source.clone(), task);
        Ok(Some(source))
    }

    fn was_touched(&self, kind: EntityKind, id: &MirrorId) -> bool {
        self.touched.contains(&(kind, id.clone()))
    }

    fn touch(&mut self, kind: EntityKind, id: &MirrorId) {
        self.touched.insert((kind, id.clone()));
    }

    fn mark_missing(&mut self, kind: EntityKind, id: &MirrorId) -> SkipReason {
        self.missing.insert((kind, id.clone()));
        SkipReason::MirrorMissing(id.clone())
    }
}

/// Reorder `items` so that every item comes after its parent when the
/// parent is part of the same set. Relative order is otherwise kept.
pub(crate) fn parents_first<T, K, I, P>(items: &[T], id: I, parent: P) -> Vec<&T>
where
    K: Eq + Hash + Clone,
    I: Fn(&T) -> &K,
    P: Fn(&T) -> Option<&K>,
{
    let parents: HashMap<&K, Option<&K>> = items.iter().map(|t| (id(t), parent(t))).collect();
    let depth = |item: &T| -> usize {
        let mut depth = 0;
        let mut current = parent(item);
        // Bounded so that a cycle in bad data cannot loop forever.
        while let Some(p) = current {
            if depth > items.len() {
                break;
            }
            match parents.get(p) {
                Some(next) => {
                    depth += 1;
                    current = *next;
                }
                None => break,
            }
        }
        depth
    };
    let mut ordered: Vec<(usize, &T)> = items.iter().map(|t| (depth(t), t)).collect();
    ordered.sort_by_key(|(depth, _)| *depth);
    ordered.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Node {
        id: String,
        parent: Option<String>,
    }

    fn node(id: &str, parent: Option<&str>) -> Node {
        Node {
            id: id.into(),
            parent: parent.map(Into::into),
        }
    }

    #[test]
    fn children_follow_parents() {
        let nodes = vec![
            node("grandchild", Some("child")),
            node("child", Some("root")),
            node("root", None),
            node("orphan", Some("elsewhere")),
        ];
        let ordered: Vec<&str> = parents_first(&nodes, |n| &n.id, |n| n.parent.as_ref())
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ordered, vec!["root", "orphan", "child", "grandchild"]);
    }

    #[test]
    fn cycles_terminate() {
        let nodes = vec![node("a", Some("b")), node("b", Some("a"))];
        assert_eq!(
            parents_first(&nodes, |n| &n.id, |n| n.parent.as_ref()).len(),
            2
        );
    }
}
