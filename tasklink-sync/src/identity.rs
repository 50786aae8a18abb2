//! Identity map: the per-pass bidirectional id linkage table.
//!
//! Built fresh for every pass from linked records the pass reads and from
//! the ids the pass creates. The stores' own records stay the durable
//! source of truth for linkage; nothing here is persisted.

use std::collections::HashMap;

use thiserror::Error;

use tasklink_core::types::{EntityKind, MirrorId, SourceId};

/// Attempt to bind an id that is already bound to a different counterpart.
///
/// This is a data-integrity problem (two records claiming one counterpart),
/// never a timing gap, so it is kept apart from unresolved references.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} identity conflict: {source_id} -> {mirror_id}, but {existing} is already bound")]
pub struct IdentityConflict {
    pub kind: EntityKind,
    pub source_id: SourceId,
    pub mirror_id: MirrorId,
    /// The counterpart already bound: a mirror id when `source_id` was taken,
    /// a source id when `mirror_id` was taken.
    pub existing: String,
}

/// Result of a successful [`IdentityMap::link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linked {
    New,
    AlreadyLinked,
}

#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    to_mirror: HashMap<(EntityKind, SourceId), MirrorId>,
    to_source: HashMap<(EntityKind, MirrorId), SourceId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror id bound to a source id.
    pub fn mirror_of(&self, kind: EntityKind, source: &SourceId) -> Option<&MirrorId> {
        self.to_mirror.get(&(kind, source.clone()))
    }

    /// Source id bound to a mirror id.
    pub fn source_of(&self, kind: EntityKind, mirror: &MirrorId) -> Option<&SourceId> {
        self.to_source.get(&(kind, mirror.clone()))
    }

    /// Bind a pair. Relinking the same pair is a no-op; binding either side
    /// to a different counterpart fails and leaves the map untouched.
    pub fn link(
        &mut self,
        kind: EntityKind,
        source: &SourceId,
        mirror: &MirrorId,
    ) -> Result<Linked, IdentityConflict> {
        let bound_mirror = self.mirror_of(kind, source);
        let bound_source = self.source_of(kind, mirror);

        match (bound_mirror, bound_source) {
            (Some(m), Some(s)) if m == mirror && s == source => return Ok(Linked::AlreadyLinked),
            (Some(m), _) if m != mirror => {
                return Err(IdentityConflict {
                    kind,
                    source_id: source.clone(),
                    mirror_id: mirror.clone(),
                    existing: m.0.clone(),
                })
            }
            (_, Some(s)) if s != source => {
                return Err(IdentityConflict {
                    kind,
                    source_id: source.clone(),
                    mirror_id: mirror.clone(),
                    existing: s.0.clone(),
                })
            }
            _ => {}
        }

        self.to_mirror.insert((kind, source.clone()), mirror.clone());
        self.to_source.insert((kind, mirror.clone()), source.clone());
        Ok(Linked::New)
    }

    /// Replace a temporary mirror id with the id confirmed by the commit.
    ///
    /// Returns the source id that was bound to `temp`, if any.
    pub fn confirm(&mut self, kind: EntityKind, temp: &MirrorId, confirmed: &MirrorId) -> Option<SourceId> {
        let source = self.to_source.remove(&(kind, temp.clone()))?;
        self.to_mirror.insert((kind, source.clone()), confirmed.clone());
        self.to_source.insert((kind, confirmed.clone()), source.clone());
        Some(source)
    }

    /// Drop a pair whose mirror record never came into existence.
    pub fn unlink_mirror(&mut self, kind: EntityKind, mirror: &MirrorId) -> Option<SourceId> {
        let source = self.to_source.remove(&(kind, mirror.clone()))?;
        self.to_mirror.remove(&(kind, source.clone()));
        Some(source)
    }

    pub fn len(&self) -> usize {
        self.to_mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_mirror.is_empty()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.to_mirror.keys().filter(|(k, _)| *k == kind).count()
    }
}
