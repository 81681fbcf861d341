//! On-disk representation of the two state files, and the
//! version-gated load/save routines that back `Store`.
//!
//! The orchestrator state file's `version` field gates restore: a
//! matching version restores directly, an older version is migrated
//! in-place (see `migrate_state`), and a newer version is discarded with
//! a warning (a newer binary wrote state this build doesn't understand).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{MessageId, PlanId, Plan, QueueMessage, Task, Worker};

/// Current on-disk version of the orchestrator state file. Bump this and
/// add a branch to `migrate_state` whenever the schema changes in a way
/// that isn't simply additive (serde's `#[serde(default)]` already covers
/// additive fields without a version bump).
pub const CURRENT_STATE_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub plans: Vec<Plan>,
    pub tasks: Vec<Task>,
    pub workers: Vec<Worker>,
    #[serde(rename = "nextTaskId")]
    pub next_task_id: u64,
    #[serde(rename = "nextPlanId")]
    pub next_plan_id: u64,
    #[serde(rename = "activePlanId")]
    pub active_plan_id: Option<PlanId>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: CURRENT_STATE_VERSION,
            plans: Vec::new(),
            tasks: Vec::new(),
            workers: Vec::new(),
            next_task_id: 1,
            next_plan_id: 1,
            active_plan_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueFile {
    pub queue: Vec<QueueMessage>,
    #[serde(rename = "processedMessageIds")]
    pub processed_message_ids: Vec<MessageId>,
}

/// Load the orchestrator state file, applying migration or discard
/// policy based on its version field. Returns `Ok(None)` if the file
/// does not exist yet (a fresh workspace).
pub fn load_state_file(path: &Path) -> Result<Option<StateFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let raw: serde_json::Value =
        serde_json::from_str(&contents).context("failed to parse state file as JSON")?;
    let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    if version == CURRENT_STATE_VERSION {
        let state: StateFile = serde_json::from_value(raw).context("failed to decode state file")?;
        Ok(Some(state))
    } else if version < CURRENT_STATE_VERSION {
        warn!(found = version, current = CURRENT_STATE_VERSION, "migrating older orchestrator state file");
        let migrated = migrate_state(version, raw)?;
        Ok(Some(migrated))
    } else {
        warn!(
            found = version,
            current = CURRENT_STATE_VERSION,
            "orchestrator state file is newer than this build understands; discarding"
        );
        Ok(None)
    }
}

/// Apply the documented migration chain from `from_version` up to
/// `CURRENT_STATE_VERSION`. There is presently one migration: version 1
/// (no `activePlanId` field) gains a `null` default.
fn migrate_state(from_version: u32, mut raw: serde_json::Value) -> Result<StateFile> {
    if from_version < 2 {
        if let Some(obj) = raw.as_object_mut() {
            obj.entry("activePlanId").or_insert(serde_json::Value::Null);
            obj.insert("version".to_string(), serde_json::json!(2));
        }
    }
    serde_json::from_value(raw).context("failed to decode migrated state file")
}

pub fn save_state_file(path: &Path, state: &StateFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(state).context("failed to serialize state file")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to finalize state file {}", path.display()))?;
    Ok(())
}

pub fn load_queue_file(path: &Path) -> Result<QueueFile> {
    if !path.exists() {
        return Ok(QueueFile::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read queue file {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse queue file {}", path.display()))
}

pub fn save_queue_file(path: &Path, queue: &QueueFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(queue).context("failed to serialize queue file")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to finalize queue file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_state_file_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".copilot-orchestrator-state.json");
        assert!(load_state_file(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_state_file_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".copilot-orchestrator-state.json");
        let state = StateFile::default();
        save_state_file(&path, &state).unwrap();
        let loaded = load_state_file(&path).unwrap().unwrap();
        assert_eq!(loaded.version, CURRENT_STATE_VERSION);
        assert_eq!(loaded.next_task_id, 1);
    }

    #[test]
    fn migrates_version_one_by_adding_active_plan_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".copilot-orchestrator-state.json");
        let v1 = serde_json::json!({
            "version": 1,
            "plans": [],
            "tasks": [],
            "workers": [],
            "nextTaskId": 3,
            "nextPlanId": 1
        });
        std::fs::write(&path, serde_json::to_string(&v1).unwrap()).unwrap();

        let loaded = load_state_file(&path).unwrap().unwrap();
        assert_eq!(loaded.version, CURRENT_STATE_VERSION);
        assert_eq!(loaded.next_task_id, 3);
        assert!(loaded.active_plan_id.is_none());
    }

    #[test]
    fn discards_newer_unknown_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".copilot-orchestrator-state.json");
        let future = serde_json::json!({"version": 999});
        std::fs::write(&path, serde_json::to_string(&future).unwrap()).unwrap();
        assert!(load_state_file(&path).unwrap().is_none());
    }

    #[test]
    fn queue_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".copilot-orchestrator-queue.json");
        let queue = QueueFile::default();
        save_queue_file(&path, &queue).unwrap();
        let loaded = load_queue_file(&path).unwrap();
        assert!(loaded.queue.is_empty());
        assert!(loaded.processed_message_ids.is_empty());
    }
}
