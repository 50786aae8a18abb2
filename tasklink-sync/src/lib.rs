//! # tasklink-sync
//!
//! Bidirectional reconciliation between a planner (the source store) and a
//! task list service (the mirror store).
//!
//! Call [`run_pass`] with a [`SourceStore`], a [`MirrorStore`] and a
//! [`CursorStore`] to reconcile projects and tasks once and advance the
//! change cursors. Concrete stores live in `tasklink-stores`.

pub mod cursor_store;
pub mod dump;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod store;

pub use cursor_store::FileCursorStore;
pub use error::{StoreError, SyncError};
pub use identity::{IdentityConflict, IdentityMap, Linked};
pub use pipeline::{run_pass, DryRunSource, DryRunWrite, PassMode, PassOptions};
pub use reconcile::Reconciler;
pub use report::{Direction, EntityReport, Failure, Outcome, PassReport, PassSummary, SkipReason};
pub use store::{
    CommitReceipt, CursorStore, MirrorBatch, MirrorCommand, MirrorSnapshot, MirrorStore,
    PendingLink, RejectedCommand, SourceStore,
};
