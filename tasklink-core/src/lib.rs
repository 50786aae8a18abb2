//! Tasklink core library: domain types, configuration, errors.
//!
//! - [`types`]: ids, records, change sets, cursor state
//! - [`config`]: `~/.tasklink/config.yaml` load / save / init
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{
    Change, CursorState, EntityKind, MirrorId, MirrorProject, MirrorTask, MirrorTaskChanges,
    MirrorTaskDraft, PendingWork, Priority, ProjectChanges, SourceId, SourceProject, SourceProjectDraft,
    SourceTask, SourceTaskChanges, SourceTaskDraft, SyncCursor, TaskMove, UnrecordedLink, Watermark,
};
