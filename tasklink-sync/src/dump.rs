//! Debug dumps of what a pass read from and wrote to the mirror.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{io_err, SyncError};

/// Write `value` as pretty JSON to `<dir>/<started>-<name>.json`.
///
/// Atomic like every other file this crate writes. Returns the path written.
pub fn write_dump<T: Serialize>(
    dir: &Path,
    started: DateTime<Utc>,
    name: &str,
    value: &T,
) -> Result<PathBuf, SyncError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let path = dir.join(format!("{}-{name}.json", started.format("%Y%m%dT%H%M%SZ")));
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}
