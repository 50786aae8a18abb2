//! Mirror store backed by the Todoist Sync API.
//!
//! Reads and writes go through the same `sync` endpoint: a read sends the
//! last sync token, a commit sends it together with the queued commands and
//! gets back the temp-id mapping, per-command status and the next token.

pub mod wire;

use std::collections::HashMap;

use tasklink_core::config::TodoistConfig;
use tasklink_core::types::{MirrorId, MirrorProject, MirrorTask, SyncCursor};
use tasklink_sync::{
    CommitReceipt, MirrorBatch, MirrorSnapshot, MirrorStore, RejectedCommand, StoreError,
};

use crate::http::HttpClient;
use wire::{ItemEnvelope, ProjectEnvelope, SyncResponse, WireCommand, RESOURCE_TYPES};

#[derive(Debug, Clone)]
pub struct TodoistMirror {
    http: HttpClient,
    token: String,
    api_base: String,
}

impl TodoistMirror {
    pub fn new(http: HttpClient, config: &TodoistConfig) -> Self {
        Self {
            http,
            token: config.token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
        }
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn post_form(
        &self,
        op: &str,
        form: &[(&str, &str)],
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let url = format!("{}/{op}", self.api_base);
        self.http.call(op, |agent| {
            agent
                .post(&url)
                .set("Authorization", &self.auth())
                .send_form(form)
        })
    }

    fn sync(&self, cursor: &SyncCursor, commands: Option<&str>) -> Result<SyncResponse, StoreError> {
        let mut form = vec![
            ("sync_token", cursor.as_str()),
            ("resource_types", RESOURCE_TYPES),
        ];
        if let Some(commands) = commands {
            form.push(("commands", commands));
        }
        let body = self
            .post_form("sync", &form)?
            .ok_or_else(|| StoreError::malformed("sync", "endpoint answered 404"))?;
        serde_json::from_value(body).map_err(|e| StoreError::malformed("sync", e.to_string()))
    }
}

/// Per-command failures of a commit, as positions in the batch.
fn rejected_commands(
    commands: &[WireCommand],
    status: &HashMap<String, serde_json::Value>,
) -> Vec<RejectedCommand> {
    commands
        .iter()
        .enumerate()
        .filter_map(|(index, cmd)| {
            let message = wire::status_error(status.get(&cmd.uuid)?)?;
            Some(RejectedCommand { index, message })
        })
        .collect()
}

impl MirrorStore for TodoistMirror {
    fn fetch_changes(&mut self, cursor: &SyncCursor) -> Result<MirrorSnapshot, StoreError> {
        let response = self.sync(cursor, None)?;
        Ok(MirrorSnapshot {
            cursor: SyncCursor(response.sync_token),
            full_sync: response.full_sync,
            projects: response.projects.into_iter().map(Into::into).collect(),
            tasks: response.items.into_iter().map(Into::into).collect(),
        })
    }

    fn get_project(&mut self, id: &MirrorId) -> Result<Option<MirrorProject>, StoreError> {
        let Some(body) = self.post_form("projects/get", &[("project_id", id.as_str())])? else {
            return Ok(None);
        };
        let envelope: ProjectEnvelope = serde_json::from_value(body)
            .map_err(|e| StoreError::malformed("projects/get", e.to_string()))?;
        Ok(Some(envelope.project.into()))
    }

    fn get_task(&mut self, id: &MirrorId) -> Result<Option<MirrorTask>, StoreError> {
        let Some(body) = self.post_form("items/get", &[("item_id", id.as_str())])? else {
            return Ok(None);
        };
        let envelope: ItemEnvelope = serde_json::from_value(body)
            .map_err(|e| StoreError::malformed("items/get", e.to_string()))?;
        Ok(Some(envelope.item.into()))
    }

    fn commit(
        &mut self,
        batch: &MirrorBatch,
        cursor: &SyncCursor,
    ) -> Result<CommitReceipt, StoreError> {
        let commands: Vec<WireCommand> = batch
            .commands()
            .iter()
            .map(|cmd| wire::encode(cmd, uuid::Uuid::new_v4().to_string()))
            .collect();
        let encoded = serde_json::to_string(&commands)
            .map_err(|e| StoreError::malformed("sync", e.to_string()))?;
        tracing::debug!("committing {} command(s)", commands.len());

        let response = self.sync(cursor, Some(&encoded))?;
        let rejected = rejected_commands(&commands, &response.sync_status);
        for r in &rejected {
            tracing::warn!(
                "mirror refused {} (#{}): {}",
                commands[r.index].kind,
                r.index,
                r.message
            );
        }
        Ok(CommitReceipt {
            cursor: SyncCursor(response.sync_token),
            id_mapping: response
                .temp_id_mapping
                .into_iter()
                .map(|(temp, real)| (MirrorId(temp), MirrorId(real)))
                .collect(),
            rejected,
            projects: response.projects.into_iter().map(Into::into).collect(),
            tasks: response.items.into_iter().map(Into::into).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasklink_sync::MirrorCommand;

    #[test]
    fn rejections_are_matched_by_uuid() {
        let commands = vec![
            wire::encode(
                &MirrorCommand::SetTaskDone {
                    id: MirrorId::from("a"),
                    done: true,
                },
                "u-0".into(),
            ),
            wire::encode(
                &MirrorCommand::SetTaskDone {
                    id: MirrorId::from("b"),
                    done: true,
                },
                "u-1".into(),
            ),
        ];
        let status = HashMap::from([
            ("u-0".to_owned(), json!("ok")),
            (
                "u-1".to_owned(),
                json!({ "error_code": 22, "error": "Item not found" }),
            ),
        ]);
        let rejected = rejected_commands(&commands, &status);
        assert_eq!(
            rejected,
            vec![RejectedCommand {
                index: 1,
                message: "Item not found (code 22)".into()
            }]
        );
    }

    #[test]
    fn api_base_trailing_slash_is_dropped() {
        let http = HttpClient::new(&Default::default());
        let mirror = TodoistMirror::new(
            http,
            &TodoistConfig {
                token: "t".into(),
                api_base: "https://api.todoist.com/sync/v9/".into(),
            },
        );
        assert_eq!(mirror.api_base, "https://api.todoist.com/sync/v9");
    }
}
