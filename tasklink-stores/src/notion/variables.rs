//! Cursor state kept as rows of a Notion "variables" database.
//!
//! Each row has a `Name` title and a `Value` rich-text column. Work carried
//! between passes is kept as JSON in one more row.

use serde_json::{json, Map, Value};

use tasklink_core::types::{CursorState, PendingWork, SyncCursor, Watermark};
use tasklink_sync::{CursorStore, StoreError, SyncError};

use super::NotionClient;

pub const MIRROR_CURSOR: &str = "todoist_sync_token";
pub const TASK_WATERMARK: &str = "notion_task_last_updated";
pub const PROJECT_WATERMARK: &str = "notion_project_last_updated";
pub const PENDING_WORK: &str = "tasklink_pending_work";

const NAME: &str = "Name";
const VALUE: &str = "Value";

#[derive(Debug, Clone)]
pub struct NotionVariableStore {
    client: NotionClient,
    database: String,
}

impl NotionVariableStore {
    pub fn new(client: NotionClient, database: impl Into<String>) -> Self {
        Self {
            client,
            database: database.into(),
        }
    }

    fn find(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let filter = json!({ "property": NAME, "title": { "equals": name } });
        Ok(self.client.query(&self.database, &filter)?.into_iter().next())
    }

    fn read(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.find(name)?.and_then(|row| row_value(&row)))
    }

    fn write(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let mut props = Map::new();
        props.insert(
            VALUE.to_owned(),
            json!({ "rich_text": [{ "text": { "content": value } }] }),
        );
        match self.find(name)? {
            Some(row) => {
                let id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StoreError::malformed("variables", "row without id"))?;
                self.client.update(id, props)
            }
            None => {
                props.insert(
                    NAME.to_owned(),
                    json!({ "title": [{ "text": { "content": name } }] }),
                );
                self.client.create(&self.database, props).map(|_| ())
            }
        }
    }
}

fn row_value(row: &Value) -> Option<String> {
    let text: String = row
        .get("properties")?
        .get(VALUE)?
        .get("rich_text")?
        .as_array()?
        .iter()
        .filter_map(|part| part.get("plain_text").and_then(Value::as_str))
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

fn parse_watermark(name: &str, raw: Option<String>) -> Watermark {
    let Some(raw) = raw else {
        return Watermark::beginning();
    };
    raw.parse().unwrap_or_else(|e| {
        tracing::warn!("variable {name}: unreadable timestamp {raw:?} ({e}); starting from the beginning");
        Watermark::beginning()
    })
}

fn parse_pending(raw: Option<String>) -> Result<PendingWork, SyncError> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(PendingWork::default()),
    }
}

impl CursorStore for NotionVariableStore {
    fn load(&mut self) -> Result<CursorState, SyncError> {
        let cursor = self.read(MIRROR_CURSOR).map_err(SyncError::CursorStore)?;
        let tasks = self.read(TASK_WATERMARK).map_err(SyncError::CursorStore)?;
        let projects = self
            .read(PROJECT_WATERMARK)
            .map_err(SyncError::CursorStore)?;
        let pending = self.read(PENDING_WORK).map_err(SyncError::CursorStore)?;
        Ok(CursorState {
            mirror_cursor: cursor.map(SyncCursor).unwrap_or_default(),
            task_watermark: parse_watermark(TASK_WATERMARK, tasks),
            project_watermark: parse_watermark(PROJECT_WATERMARK, projects),
            pending: parse_pending(pending)?,
        })
    }

    fn save(&mut self, state: &CursorState) -> Result<(), SyncError> {
        let pending = serde_json::to_string(&state.pending)?;
        self.write(PENDING_WORK, &pending)
            .and_then(|()| self.write(MIRROR_CURSOR, state.mirror_cursor.as_str()))
            .and_then(|()| self.write(TASK_WATERMARK, &state.task_watermark.to_rfc3339()))
            .and_then(|()| self.write(PROJECT_WATERMARK, &state.project_watermark.to_rfc3339()))
            .map_err(SyncError::CursorStore)
    }
}
