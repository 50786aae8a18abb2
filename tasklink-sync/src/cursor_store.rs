//! File-backed cursor store.
//!
//! Persists a [`CursorState`] JSON document at
//! `<home>/.tasklink/state/cursors.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the config file.

use std::path::{Path, PathBuf};

use tasklink_core::types::CursorState;

use crate::error::{io_err, SyncError};
use crate::store::CursorStore;

/// Path to the cursor file, rooted at `home`.
pub fn cursor_path_at(home: &Path) -> PathBuf {
    home.join(".tasklink").join("state").join("cursors.json")
}

/// Load cursor state. Returns the initial (full resync) state if the file
/// does not yet exist.
pub fn load_at(home: &Path) -> Result<CursorState, SyncError> {
    let path = cursor_path_at(home);
    if !path.exists() {
        return Ok(CursorState::initial());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save cursor state atomically.
pub fn save_at(home: &Path, state: &CursorState) -> Result<(), SyncError> {
    let path = cursor_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid cursor file path"),
        ));
    };

    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// [`CursorStore`] over the cursor file under one home directory.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    home: PathBuf,
}

impl FileCursorStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn path(&self) -> PathBuf {
        cursor_path_at(&self.home)
    }
}

impl CursorStore for FileCursorStore {
    fn load(&mut self) -> Result<CursorState, SyncError> {
        load_at(&self.home)
    }

    fn save(&mut self, state: &CursorState) -> Result<(), SyncError> {
        save_at(&self.home, state)
    }
}
