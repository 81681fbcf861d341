//! Sub-task lifecycle: admission control, execution, file-conflict
//! detection, and the prompt constructed for the `ModelRunner`.
//!
//! Binds C3 (state machine), C4 (safety limits), and C6 (health) around
//! an in-memory map of live sub-tasks; persistence of the resulting
//! `SubTask` records is the caller's job (C8 owns the `Store`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use conclave_store::models::{
    new_subtask_id, ParsedAgentType, PlanId, SpawnContext, SubTask, SubTaskId, SubTaskResult,
    SubTaskResultKind, TaskId, TaskState, WorkerId,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::agent_type::parse_agent_type;
use crate::safety::{hash_prompt, AncestryLink, SafetyError, SafetyLimits};
use crate::state::{TaskStateMachine, TransitionPolicy};

#[derive(Debug, Error)]
pub enum SubTaskManagerError {
    #[error(transparent)]
    Admission(#[from] SafetyError),

    #[error("sub-task not found: {0}")]
    NotFound(SubTaskId),

    #[error("agent type parse error: {0}")]
    AgentType(#[from] crate::agent_type::AgentTypeParseError),
}

/// Classification of an execution failure: infrastructure errors fail
/// the sub-task immediately with no retry; everything else is recorded
/// as a generic failed result with a reconstructed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    Infrastructure,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct CreateSubTaskOptions {
    pub parent_worker_id: WorkerId,
    pub parent_task_id: TaskId,
    pub plan_id: Option<PlanId>,
    pub worktree_path: std::path::PathBuf,
    pub base_branch: String,
    pub agent_type: String,
    pub prompt: String,
    pub expected_output: String,
    pub parent_depth: u8,
    pub spawn_context: SpawnContext,
    pub target_files: Vec<String>,
    pub inherited_permissions: Option<Vec<String>>,
    pub parent_sub_task_id: Option<SubTaskId>,
}

#[derive(Debug, Clone)]
pub enum SubTaskEvent {
    Changed(SubTask),
    Completed(SubTask),
}

struct RunningEntry {
    cancel: CancellationToken,
}

/// Owns live sub-task state: the records themselves, their individual
/// state machines' running status, and a cancellation token per running
/// sub-task.
pub struct SubTaskManager {
    safety: Arc<SafetyLimits>,
    transition_policy: TransitionPolicy,
    sub_tasks: Mutex<HashMap<SubTaskId, SubTask>>,
    running: Mutex<HashMap<SubTaskId, RunningEntry>>,
    events: broadcast::Sender<SubTaskEvent>,
}

impl SubTaskManager {
    pub fn new(safety: Arc<SafetyLimits>, transition_policy: TransitionPolicy) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            safety,
            transition_policy,
            sub_tasks: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubTaskEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, id: &SubTaskId) -> Option<SubTask> {
        self.sub_tasks.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<SubTask> {
        self.sub_tasks.lock().unwrap().values().cloned().collect()
    }

    /// Run every admission predicate (§safety, fixed order), then
    /// construct and register the sub-task on success.
    pub fn create_sub_task(&self, opts: CreateSubTaskOptions) -> Result<SubTask, SubTaskManagerError> {
        let parsed_agent_type: ParsedAgentType = parse_agent_type(&opts.agent_type)?;
        let ancestry_chain = self.safety.ancestry_chain_for(opts.parent_sub_task_id.as_ref());

        self.safety.check_admission(
            &opts.parent_worker_id,
            opts.parent_depth,
            opts.spawn_context,
            &opts.agent_type,
            &opts.prompt,
            &ancestry_chain,
        )?;

        let id = new_subtask_id();
        let sub_task = SubTask {
            id: id.clone(),
            parent_worker_id: opts.parent_worker_id.clone(),
            parent_task_id: opts.parent_task_id,
            plan_id: opts.plan_id,
            worktree_path: opts.worktree_path,
            base_branch: opts.base_branch,
            agent_type: opts.agent_type.clone(),
            parsed_agent_type,
            prompt: opts.prompt.clone(),
            expected_output: opts.expected_output,
            depth: opts.parent_depth + 1,
            status: TaskState::Pending,
            target_files: opts.target_files,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            spawn_context: opts.spawn_context,
            inherited_permissions: opts.inherited_permissions,
            parent_sub_task_id: opts.parent_sub_task_id,
            history: Vec::new(),
        };

        self.safety.record_spawn(
            &opts.parent_worker_id,
            AncestryLink {
                sub_task_id: id.clone(),
                parent_sub_task_id: sub_task.parent_sub_task_id.clone(),
                worker_id: opts.parent_worker_id,
                agent_type: opts.agent_type,
                prompt_hash: hash_prompt(&opts.prompt),
            },
        );

        self.sub_tasks.lock().unwrap().insert(id, sub_task.clone());
        let _ = self.events.send(SubTaskEvent::Changed(sub_task.clone()));
        Ok(sub_task)
    }

    /// Normalize paths (lowercase, forward slashes) and return the ids
    /// of *running* sub-tasks (excluding `exclude_id`, if given) whose
    /// `targetFiles` intersect `target_files`.
    pub fn check_file_conflicts(&self, target_files: &[String], exclude_id: Option<&SubTaskId>) -> Vec<SubTaskId> {
        let normalized: Vec<String> = target_files.iter().map(|f| normalize_path(f)).collect();
        let running_ids: Vec<SubTaskId> = self.running.lock().unwrap().keys().cloned().collect();
        let sub_tasks = self.sub_tasks.lock().unwrap();

        running_ids
            .into_iter()
            .filter(|id| exclude_id.is_none_or(|excl| excl != id))
            .filter_map(|id| sub_tasks.get(&id).map(|st| (id, st)))
            .filter(|(_, st)| {
                st.target_files
                    .iter()
                    .any(|f| normalized.contains(&normalize_path(f)))
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Register a cancellation token and transition to running. Callers
    /// should check `check_file_conflicts` first and surface a
    /// `FileConflict` error themselves if it returns any ids.
    pub fn begin_execution(&self, id: &SubTaskId) -> Result<CancellationToken, SubTaskManagerError> {
        let mut sub_tasks = self.sub_tasks.lock().unwrap();
        let sub_task = sub_tasks.get_mut(id).ok_or_else(|| SubTaskManagerError::NotFound(id.clone()))?;
        self.apply_transition(sub_task, TaskState::Running);
        let token = CancellationToken::new();
        self.running.lock().unwrap().insert(id.clone(), RunningEntry { cancel: token.clone() });
        let _ = self.events.send(SubTaskEvent::Changed(sub_task.clone()));
        Ok(token)
    }

    /// Finalize a sub-task after the `ModelRunner` call returns (or
    /// throws). Always removes the running-map entry. Ancestry is
    /// cleared on every terminal outcome, not only success.
    pub fn complete_execution(&self, id: &SubTaskId, result: SubTaskResult) -> Result<SubTask, SubTaskManagerError> {
        let final_state = match result.kind {
            SubTaskResultKind::Completed => TaskState::Completed,
            SubTaskResultKind::Failed => TaskState::Failed,
            SubTaskResultKind::Cancelled => TaskState::Cancelled,
        };

        let sub_task = {
            let mut sub_tasks = self.sub_tasks.lock().unwrap();
            let sub_task = sub_tasks.get_mut(id).ok_or_else(|| SubTaskManagerError::NotFound(id.clone()))?;
            self.apply_transition(sub_task, final_state);
            sub_task.completed_at = Some(Utc::now());
            sub_task.result = Some(result);
            sub_task.clone()
        };

        self.running.lock().unwrap().remove(id);
        self.safety.terminalize(&sub_task.parent_worker_id, id);

        let _ = self.events.send(SubTaskEvent::Changed(sub_task.clone()));
        let _ = self.events.send(SubTaskEvent::Completed(sub_task.clone()));
        Ok(sub_task)
    }

    /// Classify an error surfaced from the `ModelRunner` call and
    /// finalize the sub-task accordingly. Infrastructure errors fail
    /// immediately with no retry.
    pub fn fail_execution(
        &self,
        id: &SubTaskId,
        kind: ExecutionErrorKind,
        message: impl Into<String>,
    ) -> Result<SubTask, SubTaskManagerError> {
        let message = message.into();
        let result = SubTaskResult {
            kind: SubTaskResultKind::Failed,
            message: match kind {
                ExecutionErrorKind::Infrastructure => format!("infrastructure error: {message}"),
                ExecutionErrorKind::Unknown => message,
            },
            commit_message: None,
        };
        self.complete_execution(id, result)
    }

    /// Called by a finalizer after the run completes: if the sub-task
    /// is still `running` (no explicit completion/failure signal ever
    /// arrived), force-fail it so the parent is always notified.
    pub fn force_fail_if_still_running(&self, id: &SubTaskId) -> Result<Option<SubTask>, SubTaskManagerError> {
        let still_running = self
            .sub_tasks
            .lock()
            .unwrap()
            .get(id)
            .map(|st| st.status == TaskState::Running)
            .unwrap_or(false);
        if !still_running {
            return Ok(None);
        }
        warn!(sub_task_id = %id, "execution completed unexpectedly; force-failing");
        self.fail_execution(id, ExecutionErrorKind::Unknown, "execution completed unexpectedly").map(Some)
    }

    /// Validate via the state machine; warns but proceeds on invalid
    /// transitions under the manager's configured policy. Sets
    /// `completedAt` for terminal states.
    pub fn update_status(
        &self,
        id: &SubTaskId,
        status: TaskState,
        result: Option<SubTaskResult>,
    ) -> Result<SubTask, SubTaskManagerError> {
        let mut sub_tasks = self.sub_tasks.lock().unwrap();
        let sub_task = sub_tasks.get_mut(id).ok_or_else(|| SubTaskManagerError::NotFound(id.clone()))?;
        self.apply_transition(sub_task, status);
        if status.is_terminal() {
            sub_task.completed_at = Some(Utc::now());
        }
        if let Some(result) = result {
            sub_task.result = Some(result);
        }
        let updated = sub_task.clone();
        drop(sub_tasks);
        let _ = self.events.send(SubTaskEvent::Changed(updated.clone()));
        if status.is_terminal() {
            let _ = self.events.send(SubTaskEvent::Completed(updated.clone()));
        }
        Ok(updated)
    }

    pub fn cancel_sub_task(&self, id: &SubTaskId) -> Result<SubTask, SubTaskManagerError> {
        if let Some(entry) = self.running.lock().unwrap().get(id) {
            entry.cancel.cancel();
        }
        self.complete_execution(
            id,
            SubTaskResult {
                kind: SubTaskResultKind::Cancelled,
                message: "cancelled".to_string(),
                commit_message: None,
            },
        )
    }

    fn apply_transition(&self, sub_task: &mut SubTask, to: TaskState) {
        match TaskStateMachine::transition(sub_task.status, to, self.transition_policy) {
            Ok(true) => {
                sub_task.history.push(conclave_store::models::TransitionRecord {
                    from: sub_task.status,
                    to,
                    at: Utc::now(),
                    forced: false,
                });
                sub_task.status = to;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(sub_task_id = %sub_task.id, %err, "invalid sub-task transition rejected");
            }
        }
    }
}

fn normalize_path(path: &str) -> String {
    path.to_lowercase().replace('\\', "/")
}

/// Build the prompt delivered to the `ModelRunner` for a sub-task: task
/// metadata, the verbatim user prompt, the expected deliverable, the
/// completion contract, the spawn policy, the worktree restriction, and
/// the communication contract.
pub fn build_sub_task_prompt(sub_task: &SubTask, max_depth: u8) -> String {
    let may_spawn = sub_task.depth < max_depth;
    format!(
        "# Task\n\
         | Field | Value |\n\
         |---|---|\n\
         | Agent type | {agent_type} |\n\
         | Sub-task id | {id} |\n\
         | Parent worker | {parent_worker} |\n\
         | Depth | {depth} |\n\
         | Worktree | {worktree} |\n\n\
         ## Prompt\n{prompt}\n\n\
         ## Expected deliverable\n{expected}\n\n\
         ## Completion contract\n\
         You MUST signal completion by invoking the completion tool with a commit \
         message. Any changes not committed and signalled are considered lost.\n\n\
         ## Spawning policy\n\
         {spawn_policy}\n\n\
         ## Worktree restriction\n\
         You MUST only read and write files within your own worktree: {worktree}.\n\n\
         ## Communication\n\
         Use the approval/status/question/completion tools to notify your parent; \
         do not assume your parent observes anything you have not explicitly sent.\n",
        agent_type = sub_task.agent_type,
        id = sub_task.id,
        parent_worker = sub_task.parent_worker_id,
        depth = sub_task.depth,
        worktree = sub_task.worktree_path.display(),
        prompt = sub_task.prompt,
        expected = sub_task.expected_output,
        spawn_policy = if may_spawn {
            "You may spawn further sub-tasks."
        } else {
            "You may NOT spawn further sub-tasks; you are at the maximum recursion depth."
        },
    )
}
