//! Sync API v9 request and response shapes.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use tasklink_core::types::{Change, MirrorId, MirrorProject, MirrorTask, Priority};
use tasklink_sync::MirrorCommand;

pub const RESOURCE_TYPES: &str = r#"["projects","items"]"#;

#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    pub sync_token: String,
    #[serde(default)]
    pub full_sync: bool,
    #[serde(default)]
    pub projects: Vec<WireProject>,
    #[serde(default)]
    pub items: Vec<WireItem>,
    #[serde(default)]
    pub temp_id_mapping: HashMap<String, String>,
    /// Command uuid → `"ok"` or an error object.
    #[serde(default)]
    pub sync_status: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_archived: bool,
}

impl From<WireProject> for MirrorProject {
    fn from(p: WireProject) -> Self {
        MirrorProject {
            id: MirrorId(p.id),
            name: p.name,
            is_deleted: p.is_deleted || p.is_archived,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDue {
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireItem {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub checked: bool,
    pub due: Option<WireDue>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub project_id: Option<String>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

fn default_priority() -> u8 {
    Priority::NONE.get()
}

impl From<WireItem> for MirrorTask {
    fn from(item: WireItem) -> Self {
        MirrorTask {
            id: MirrorId(item.id),
            title: item.content,
            done: item.checked,
            // Recurring and timed dues carry a time part; only the date is synced.
            due_date: item
                .due
                .and_then(|due| due.date.get(..10).map(str::to_owned))
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            priority: Priority::new(item.priority).unwrap_or_default(),
            project: item.project_id.map(MirrorId),
            parent: item.parent_id.map(MirrorId),
            is_deleted: item.is_deleted,
        }
    }
}

/// Response of `projects/get`.
#[derive(Debug, Deserialize)]
pub struct ProjectEnvelope {
    pub project: WireProject,
}

/// Response of `items/get`.
#[derive(Debug, Deserialize)]
pub struct ItemEnvelope {
    pub item: WireItem,
}

/// One queued command as the API expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireCommand {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub args: Map<String, Value>,
}

fn due(date: Option<NaiveDate>) -> Value {
    match date {
        Some(d) => json!({ "date": d.format("%Y-%m-%d").to_string() }),
        None => Value::Null,
    }
}

fn args(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}

/// Encode one engine command. `uuid` keys the command in `sync_status`.
pub fn encode(command: &MirrorCommand, uuid: String) -> WireCommand {
    let (kind, temp_id, args) = match command {
        MirrorCommand::CreateProject { temp_id, name } => (
            "project_add",
            Some(temp_id.0.clone()),
            args([("name", json!(name))]),
        ),
        MirrorCommand::UpdateProject { id, changes } => {
            let mut a = args([("id", json!(id.as_str()))]);
            if let Change::Set(name) = &changes.name {
                a.insert("name".into(), json!(name));
            }
            ("project_update", None, a)
        }
        MirrorCommand::CreateTask { temp_id, draft } => {
            let mut a = args([
                ("content", json!(draft.title)),
                ("project_id", json!(draft.project.as_str())),
                ("priority", json!(draft.priority.get())),
            ]);
            if draft.due_date.is_some() {
                a.insert("due".into(), due(draft.due_date));
            }
            if let Some(parent) = &draft.parent {
                a.insert("parent_id".into(), json!(parent.as_str()));
            }
            ("item_add", Some(temp_id.0.clone()), a)
        }
        MirrorCommand::UpdateTask { id, changes } => {
            let mut a = args([("id", json!(id.as_str()))]);
            if let Change::Set(title) = &changes.title {
                a.insert("content".into(), json!(title));
            }
            if let Change::Set(date) = changes.due_date {
                a.insert("due".into(), due(date));
            }
            if let Change::Set(priority) = changes.priority {
                a.insert("priority".into(), json!(priority.get()));
            }
            ("item_update", None, a)
        }
        MirrorCommand::MoveTask {
            id,
            to,
            current_project,
        } => {
            let mut a = args([("id", json!(id.as_str()))]);
            // item_move takes exactly one destination.
            match (&to.parent, &to.project) {
                (Change::Set(Some(parent)), _) => {
                    a.insert("parent_id".into(), json!(parent.as_str()));
                }
                (_, Change::Set(project)) => {
                    a.insert("project_id".into(), json!(project.as_str()));
                }
                (Change::Set(None), Change::Unchanged) => {
                    if let Some(project) = current_project {
                        a.insert("project_id".into(), json!(project.as_str()));
                    }
                }
                (Change::Unchanged, Change::Unchanged) => {}
            }
            ("item_move", None, a)
        }
        MirrorCommand::SetTaskDone { id, done } => (
            if *done { "item_complete" } else { "item_uncomplete" },
            None,
            args([("id", json!(id.as_str()))]),
        ),
    };
    WireCommand {
        kind,
        uuid,
        temp_id,
        args,
    }
}

/// Human-readable error of a non-ok `sync_status` entry.
pub fn status_error(status: &Value) -> Option<String> {
    if status.as_str() == Some("ok") {
        return None;
    }
    let message = status
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| status.to_string());
    Some(match status.get("error_code").and_then(Value::as_i64) {
        Some(code) => format!("{message} (code {code})"),
        None => message,
    })
}
