//! Planner store backed by two Notion databases (projects and tasks).

pub mod properties;
pub mod variables;

use serde_json::{json, Map, Value};

use tasklink_core::config::NotionConfig;
use tasklink_core::types::{
    EntityKind, MirrorId, ProjectChanges, SourceId, SourceProject, SourceProjectDraft, SourceTask,
    SourceTaskChanges, SourceTaskDraft, Watermark,
};
use tasklink_sync::{SourceStore, StoreError};

use crate::http::HttpClient;

pub use variables::NotionVariableStore;

pub const API_BASE: &str = "https://api.notion.com/v1";
pub const API_VERSION: &str = "2022-06-28";

/// Thin client over the handful of endpoints the adapters use.
#[derive(Debug, Clone)]
pub struct NotionClient {
    http: HttpClient,
    token: String,
    base: String,
}

impl NotionClient {
    pub fn new(http: HttpClient, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            base: API_BASE.to_owned(),
        }
    }

    /// Point the client at another API root.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_owned();
        self
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// All pages matching `filter`, following pagination.
    pub fn query(&self, database: &str, filter: &Value) -> Result<Vec<Value>, StoreError> {
        let op = format!("databases/{database}/query");
        let url = format!("{}/{op}", self.base);
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "filter": filter, "page_size": 100 });
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }
            let response = self.http.call_required(&op, |agent| {
                agent
                    .post(&url)
                    .set("Authorization", &self.auth())
                    .set("Notion-Version", API_VERSION)
                    .send_json(&body)
            })?;
            let results = response
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| StoreError::malformed(&op, "missing results"))?;
            pages.extend(results.iter().cloned());

            let has_more = response
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            cursor = response
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_owned);
            if !has_more || cursor.is_none() {
                return Ok(pages);
            }
        }
    }

    /// A page by id; archived or missing pages are `None`.
    pub fn retrieve(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let op = format!("pages/{id}");
        let url = format!("{}/{op}", self.base);
        let page = self.http.call(&op, |agent| {
            agent
                .get(&url)
                .set("Authorization", &self.auth())
                .set("Notion-Version", API_VERSION)
                .call()
        })?;
        Ok(page.filter(|p| !properties::is_archived(p)))
    }

    pub fn create(&self, database: &str, props: Map<String, Value>) -> Result<Value, StoreError> {
        let url = format!("{}/pages", self.base);
        let body = json!({
            "parent": { "database_id": database },
            "properties": props,
        });
        self.http.call_required("pages", |agent| {
            agent
                .post(&url)
                .set("Authorization", &self.auth())
                .set("Notion-Version", API_VERSION)
                .send_json(&body)
        })
    }

    pub fn update(&self, id: &str, props: Map<String, Value>) -> Result<(), StoreError> {
        let op = format!("pages/{id}");
        let url = format!("{}/{op}", self.base);
        let body = json!({ "properties": props });
        self.http.call_required(&op, |agent| {
            agent
                .request("PATCH", &url)
                .set("Authorization", &self.auth())
                .set("Notion-Version", API_VERSION)
                .send_json(&body)
        })?;
        Ok(())
    }
}

fn edited_since(since: &Watermark) -> Value {
    json!({
        "timestamp": "last_edited_time",
        "last_edited_time": { "on_or_after": since.to_rfc3339() }
    })
}

fn linked_to(mirror: &MirrorId) -> Value {
    json!({
        "property": properties::MIRROR_ID,
        "rich_text": { "equals": mirror.as_str() }
    })
}

fn created_id(page: &Value, op: &str) -> Result<SourceId, StoreError> {
    page.get("id")
        .and_then(Value::as_str)
        .map(SourceId::from)
        .ok_or_else(|| StoreError::malformed(op, "created page without id"))
}

/// [`SourceStore`] over the projects and tasks databases.
#[derive(Debug, Clone)]
pub struct NotionSource {
    client: NotionClient,
    tasks_database: String,
    projects_database: String,
}

impl NotionSource {
    pub fn new(client: NotionClient, config: &NotionConfig) -> Self {
        Self {
            client,
            tasks_database: config.tasks_database.clone(),
            projects_database: config.projects_database.clone(),
        }
    }
}

impl SourceStore for NotionSource {
    fn changed_projects(&mut self, since: &Watermark) -> Result<Vec<SourceProject>, StoreError> {
        self.client
            .query(&self.projects_database, &edited_since(since))?
            .iter()
            .map(properties::parse_project)
            .collect()
    }

    fn changed_tasks(&mut self, since: &Watermark) -> Result<Vec<SourceTask>, StoreError> {
        self.client
            .query(&self.tasks_database, &edited_since(since))?
            .iter()
            .map(properties::parse_task)
            .collect()
    }

    fn get_project(&mut self, id: &SourceId) -> Result<Option<SourceProject>, StoreError> {
        self.client
            .retrieve(id.as_str())?
            .as_ref()
            .map(properties::parse_project)
            .transpose()
    }

    fn get_task(&mut self, id: &SourceId) -> Result<Option<SourceTask>, StoreError> {
        self.client
            .retrieve(id.as_str())?
            .as_ref()
            .map(properties::parse_task)
            .transpose()
    }

    fn find_project_by_mirror(
        &mut self,
        id: &MirrorId,
    ) -> Result<Option<SourceProject>, StoreError> {
        self.client
            .query(&self.projects_database, &linked_to(id))?
            .first()
            .map(properties::parse_project)
            .transpose()
    }

    fn find_task_by_mirror(&mut self, id: &MirrorId) -> Result<Option<SourceTask>, StoreError> {
        self.client
            .query(&self.tasks_database, &linked_to(id))?
            .first()
            .map(properties::parse_task)
            .transpose()
    }

    fn create_project(&mut self, draft: &SourceProjectDraft) -> Result<SourceId, StoreError> {
        let page = self
            .client
            .create(&self.projects_database, properties::project_create(draft))?;
        created_id(&page, "create project")
    }

    fn update_project(
        &mut self,
        id: &SourceId,
        changes: &ProjectChanges,
    ) -> Result<(), StoreError> {
        let props = properties::project_update(changes);
        if props.is_empty() {
            return Ok(());
        }
        self.client.update(id.as_str(), props)
    }

    fn create_task(&mut self, draft: &SourceTaskDraft) -> Result<SourceId, StoreError> {
        let page = self
            .client
            .create(&self.tasks_database, properties::task_create(draft))?;
        created_id(&page, "create task")
    }

    fn update_task(
        &mut self,
        id: &SourceId,
        changes: &SourceTaskChanges,
    ) -> Result<(), StoreError> {
        let props = properties::task_update(changes);
        if props.is_empty() {
            return Ok(());
        }
        self.client.update(id.as_str(), props)
    }

    fn record_mirror_link(
        &mut self,
        _kind: EntityKind,
        id: &SourceId,
        mirror: &MirrorId,
    ) -> Result<(), StoreError> {
        self.client
            .update(id.as_str(), properties::mirror_link(mirror))
    }
}
