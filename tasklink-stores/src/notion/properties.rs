//! Page property shapes of the planner databases.
//!
//! Reading is lenient (absent or empty properties read as empty values);
//! only a missing page id is malformed.

use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use tasklink_core::types::{
    Change, MirrorId, Priority, ProjectChanges, SourceId, SourceProject, SourceProjectDraft,
    SourceTask, SourceTaskChanges, SourceTaskDraft,
};
use tasklink_sync::StoreError;

pub const TASK_TITLE: &str = "Task name";
pub const TASK_STATUS: &str = "Status";
pub const TASK_DUE: &str = "Due";
pub const TASK_PROJECT: &str = "Project";
pub const TASK_PARENT: &str = "Parent-task";
pub const TASK_PRIORITY: &str = "Priority";
pub const PROJECT_TITLE: &str = "Project name";
/// Linkage field on both databases.
pub const MIRROR_ID: &str = "TodoistID";

pub const STATUS_DONE: &str = "Done";
pub const STATUS_OPEN: &str = "Not Started";

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn page_id(page: &Value, op: &str) -> Result<SourceId, StoreError> {
    page.get("id")
        .and_then(Value::as_str)
        .map(SourceId::from)
        .ok_or_else(|| StoreError::malformed(op, "page without id"))
}

fn prop<'a>(page: &'a Value, name: &str) -> Option<&'a Value> {
    page.get("properties")?.get(name)
}

/// Concatenated plain text of a `title` or `rich_text` array.
fn plain_text(page: &Value, name: &str, kind: &str) -> String {
    prop(page, name)
        .and_then(|p| p.get(kind))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("plain_text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn mirror_id(page: &Value) -> Option<MirrorId> {
    let text = plain_text(page, MIRROR_ID, "rich_text");
    let text = text.trim();
    (!text.is_empty()).then(|| MirrorId::from(text))
}

fn first_relation(page: &Value, name: &str) -> Option<SourceId> {
    prop(page, name)?
        .get("relation")?
        .as_array()?
        .first()?
        .get("id")?
        .as_str()
        .map(SourceId::from)
}

fn due_date(page: &Value) -> Option<NaiveDate> {
    let start = prop(page, TASK_DUE)?.get("date")?.get("start")?.as_str()?;
    // Date-times carry a time part; only the date is synced.
    NaiveDate::parse_from_str(start.get(..10)?, "%Y-%m-%d").ok()
}

pub fn priority_from_label(label: Option<&str>) -> Priority {
    match label {
        Some("High") => Priority::HIGH,
        Some("Medium") => Priority::MEDIUM,
        Some("Low") => Priority::LOW,
        _ => Priority::NONE,
    }
}

pub fn is_archived(page: &Value) -> bool {
    page.get("archived").and_then(Value::as_bool).unwrap_or(false)
        || page.get("in_trash").and_then(Value::as_bool).unwrap_or(false)
}

pub fn parse_project(page: &Value) -> Result<SourceProject, StoreError> {
    Ok(SourceProject {
        id: page_id(page, "parse project")?,
        mirror_id: mirror_id(page),
        name: plain_text(page, PROJECT_TITLE, "title"),
    })
}

pub fn parse_task(page: &Value) -> Result<SourceTask, StoreError> {
    let status = prop(page, TASK_STATUS)
        .and_then(|p| p.get("status"))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str);
    let priority = prop(page, TASK_PRIORITY)
        .and_then(|p| p.get("select"))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str);
    Ok(SourceTask {
        id: page_id(page, "parse task")?,
        mirror_id: mirror_id(page),
        title: plain_text(page, TASK_TITLE, "title"),
        done: status == Some(STATUS_DONE),
        due_date: due_date(page),
        priority: priority_from_label(priority),
        project: first_relation(page, TASK_PROJECT),
        parent: first_relation(page, TASK_PARENT),
    })
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn title(text: &str) -> Value {
    json!({ "title": [{ "text": { "content": text } }] })
}

fn rich_text(text: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": text } }] })
}

fn status(done: bool) -> Value {
    json!({ "status": { "name": if done { STATUS_DONE } else { STATUS_OPEN } } })
}

fn date(date: Option<NaiveDate>) -> Value {
    match date {
        Some(d) => json!({ "date": { "start": d.format("%Y-%m-%d").to_string() } }),
        None => json!({ "date": null }),
    }
}

fn relation(id: Option<&SourceId>) -> Value {
    match id {
        Some(id) => json!({ "relation": [{ "id": id.as_str() }] }),
        None => json!({ "relation": [] }),
    }
}

pub fn mirror_link(mirror: &MirrorId) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert(MIRROR_ID.to_owned(), rich_text(mirror.as_str()));
    props
}

pub fn project_create(draft: &SourceProjectDraft) -> Map<String, Value> {
    let mut props = mirror_link(&draft.mirror_id);
    props.insert(PROJECT_TITLE.to_owned(), title(&draft.name));
    props
}

pub fn project_update(changes: &ProjectChanges) -> Map<String, Value> {
    let mut props = Map::new();
    if let Change::Set(name) = &changes.name {
        props.insert(PROJECT_TITLE.to_owned(), title(name));
    }
    props
}

pub fn task_create(draft: &SourceTaskDraft) -> Map<String, Value> {
    let mut props = mirror_link(&draft.mirror_id);
    props.insert(TASK_TITLE.to_owned(), title(&draft.title));
    props.insert(TASK_STATUS.to_owned(), status(draft.done));
    if draft.due_date.is_some() {
        props.insert(TASK_DUE.to_owned(), date(draft.due_date));
    }
    if let Some(project) = &draft.project {
        props.insert(TASK_PROJECT.to_owned(), relation(Some(project)));
    }
    if let Some(parent) = &draft.parent {
        props.insert(TASK_PARENT.to_owned(), relation(Some(parent)));
    }
    props
}

pub fn task_update(changes: &SourceTaskChanges) -> Map<String, Value> {
    let mut props = Map::new();
    if let Change::Set(text) = &changes.title {
        props.insert(TASK_TITLE.to_owned(), title(text));
    }
    if let Change::Set(done) = changes.done {
        props.insert(TASK_STATUS.to_owned(), status(done));
    }
    if let Change::Set(due) = changes.due_date {
        props.insert(TASK_DUE.to_owned(), date(due));
    }
    if let Change::Set(project) = &changes.project {
        props.insert(TASK_PROJECT.to_owned(), relation(project.as_ref()));
    }
    if let Change::Set(parent) = &changes.parent {
        props.insert(TASK_PARENT.to_owned(), relation(parent.as_ref()));
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_page() -> Value {
        json!({
            "object": "page",
            "id": "page-t1",
            "archived": false,
            "properties": {
                "Task name": { "type": "title", "title": [
                    { "plain_text": "Renew " }, { "plain_text": "passport" }
                ]},
                "Status": { "type": "status", "status": { "name": "Done" } },
                "TodoistID": { "type": "rich_text", "rich_text": [{ "plain_text": "6X7rM8997g3RQmvh" }] },
                "Due": { "type": "date", "date": { "start": "2024-09-30T09:00:00.000+02:00" } },
                "Project": { "type": "relation", "relation": [{ "id": "page-p1" }] },
                "Parent-task": { "type": "relation", "relation": [] },
                "Priority": { "type": "select", "select": { "name": "Medium" } }
            }
        })
    }

    #[test]
    fn task_page_is_parsed() {
        let task = parse_task(&task_page()).unwrap();
        assert_eq!(task.id, SourceId::from("page-t1"));
        assert_eq!(task.title, "Renew passport");
        assert!(task.done);
        assert_eq!(task.mirror_id, Some(MirrorId::from("6X7rM8997g3RQmvh")));
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2024, 9, 30));
        assert_eq!(task.project, Some(SourceId::from("page-p1")));
        assert_eq!(task.parent, None);
        assert_eq!(task.priority, Priority::MEDIUM);
    }

    #[test]
    fn empty_properties_read_as_defaults() {
        let page = json!({
            "id": "page-t2",
            "properties": {
                "Task name": { "title": [] },
                "Status": { "status": null },
                "TodoistID": { "rich_text": [] },
                "Due": { "date": null },
                "Priority": { "select": null }
            }
        });
        let task = parse_task(&page).unwrap();
        assert_eq!(task.title, "");
        assert!(!task.done);
        assert_eq!(task.mirror_id, None);
        assert_eq!(task.due_date, None);
        assert_eq!(task.priority, Priority::NONE);
        assert_eq!(task.project, None);
    }

    #[test]
    fn page_without_id_is_malformed() {
        let err = parse_project(&json!({ "properties": {} })).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn update_writes_only_set_properties() {
        let props = task_update(&SourceTaskChanges {
            done: Change::Set(false),
            due_date: Change::Set(None),
            parent: Change::Set(None),
            ..Default::default()
        });
        assert_eq!(props.len(), 3);
        assert_eq!(props[TASK_STATUS]["status"]["name"], STATUS_OPEN);
        assert!(props[TASK_DUE]["date"].is_null());
        assert_eq!(props[TASK_PARENT]["relation"], json!([]));
        assert!(!props.contains_key(TASK_TITLE));
    }

    #[test]
    fn create_carries_link_and_relations() {
        let props = task_create(&SourceTaskDraft {
            title: "Call mum".into(),
            done: false,
            due_date: NaiveDate::from_ymd_opt(2024, 1, 2),
            project: Some(SourceId::from("page-p1")),
            parent: None,
            mirror_id: MirrorId::from("m-1"),
        });
        assert_eq!(props[MIRROR_ID]["rich_text"][0]["text"]["content"], "m-1");
        assert_eq!(props[TASK_DUE]["date"]["start"], "2024-01-02");
        assert_eq!(props[TASK_PROJECT]["relation"][0]["id"], "page-p1");
        assert!(!props.contains_key(TASK_PARENT));
        assert!(!props.contains_key(TASK_PRIORITY), "priority is never written");
    }
}
