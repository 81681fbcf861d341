//! Plans, tasks, and workers: dependency resolution, deployment,
//! completion, and event emission, bound on top of the store's
//! persistence and C2-C7.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conclave_store::models::{
    new_message_id, new_worker_id, MessageType, Owner, OwnerType, Plan, PlanId, PlanStatus,
    PendingApproval, Priority, QueueMessage, SpawnContext, SubTask, SubTaskId, SubTaskResult,
    SubTaskResultKind, Task, TaskId, TaskState, TransitionRecord, Worker, WorkerId, WorkerStatus,
};
use conclave_store::queries::{plans as plans_db, tasks as tasks_db, workers as workers_db};
use conclave_store::Store;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::bus::{MessageBus, MessageHandler};
use crate::health::{HealthConfig, HealthMonitor};
use crate::model_runner::{ModelRunner, RunOptions};
use crate::safety::{hash_prompt, AncestryLink, SafetyConfig, SafetyError, SafetyLimits};
use crate::state::{TaskStateMachine, TransitionPolicy};
use crate::subtask::{build_sub_task_prompt, CreateSubTaskOptions, ExecutionErrorKind, SubTaskManager, SubTaskManagerError};
use crate::worktree::{sanitize_branch_name, WorktreeCoordinator, WorktreeError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("dependency cycle detected among tasks: {0:?}")]
    DependencyCycle(Vec<TaskId>),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("task {0} is not pending and cannot be deployed")]
    NotPending(TaskId),

    #[error("infrastructure error: {0}")]
    Infrastructure(#[from] WorktreeError),

    #[error("pending approval not found: {0}")]
    ApprovalNotFound(String),

    #[error(transparent)]
    ModelRunner(#[from] anyhow::Error),

    #[error("deploy admission denied: {0}")]
    Admission(#[from] SafetyError),

    #[error(transparent)]
    SubTask(#[from] SubTaskManagerError),

    #[error("target files conflict with running sub-task(s): {0:?}")]
    FileConflict(Vec<SubTaskId>),
}

/// Worker id standing in for the orchestrator itself when it deploys a
/// top-level task -- the root every ancestry chain traces back to, and
/// the bucket `SafetyLimits` rate/total/parallel caps are charged
/// against for deploys that have no parent worker of their own.
fn orchestrator_spawner_id() -> WorkerId {
    WorkerId("orchestrator".to_string())
}

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    TaskQueued(TaskId),
    TaskStarted(TaskId),
    TaskCompleted(TaskId),
    TaskFailed(TaskId, String),
    WorkerIdle(WorkerId),
    WorkerError(WorkerId, String),
    PlanStarted(PlanId),
    PlanPaused(PlanId),
    PlanResumed(PlanId),
    PlanCompleted(PlanId),
}

pub struct AddTaskOptions {
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub dependencies: Vec<TaskId>,
    pub plan_id: Option<PlanId>,
    pub base_branch: Option<String>,
    pub model_id: Option<String>,
    pub agent_type: Option<String>,
    pub target_files: Vec<String>,
}

pub struct SpawnSubTaskOptions {
    pub parent_worker_id: WorkerId,
    pub agent_type: String,
    pub prompt: String,
    pub expected_output: String,
    pub target_files: Vec<String>,
}

pub struct OrchestratorCore {
    store: Arc<Store>,
    worktrees: Arc<WorktreeCoordinator>,
    model_runner: Arc<dyn ModelRunner>,
    transition_policy: TransitionPolicy,
    max_parallel_sub_tasks: usize,
    events: broadcast::Sender<OrchestratorEvent>,
    bus: Arc<MessageBus>,
    safety: Arc<SafetyLimits>,
    health: Arc<HealthMonitor>,
    sub_tasks: Arc<SubTaskManager>,
}

impl OrchestratorCore {
    pub fn new(
        store: Arc<Store>,
        worktrees: Arc<WorktreeCoordinator>,
        model_runner: Arc<dyn ModelRunner>,
        transition_policy: TransitionPolicy,
        max_parallel_sub_tasks: usize,
        safety_config: SafetyConfig,
        health_config: HealthConfig,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(256);
        let bus = MessageBus::new(Arc::clone(&store));
        let safety = Arc::new(SafetyLimits::new(safety_config));
        let (health, mut health_events) = HealthMonitor::new(health_config);
        let sub_tasks = Arc::new(SubTaskManager::new(Arc::clone(&safety), transition_policy));

        let this = Arc::new(Self {
            store,
            worktrees,
            model_runner,
            transition_policy,
            max_parallel_sub_tasks,
            events,
            bus,
            safety,
            health,
            sub_tasks,
        });

        this.health.spawn_idle_ticker();

        // The default message-bus handler wakes an idle worker on any
        // inbound message; registration is async, so hand it off to a
        // background task rather than block construction on it.
        {
            let bus = Arc::clone(&this.bus);
            let store = Arc::clone(&this.store);
            let health = Arc::clone(&this.health);
            tokio::spawn(async move {
                bus.register_default_handler(Arc::new(WorkerWakeHandler { store, health })).await;
            });
        }

        // Surface health events as orchestrator events and, for idle
        // workers, reflect the idle status into the store.
        {
            let this = Arc::clone(&this);
            tokio::spawn(async move {
                while let Some(event) = health_events.recv().await {
                    match event {
                        crate::health::HealthEvent::WorkerIdle { worker_id } => {
                            workers_db::update_worker(&this.store, &worker_id, |w| {
                                if w.status == WorkerStatus::Running {
                                    w.status = WorkerStatus::Idle;
                                }
                            });
                            let _ = this.events.send(OrchestratorEvent::WorkerIdle(worker_id));
                        }
                        crate::health::HealthEvent::WorkerUnhealthy { worker_id, reason } => {
                            warn!(%worker_id, ?reason, "worker flagged unhealthy");
                            let _ = this
                                .events
                                .send(OrchestratorEvent::WorkerError(worker_id, format!("{reason:?}")));
                        }
                    }
                }
            });
        }

        this
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    // -- Plans ------------------------------------------------------

    pub fn create_plan(&self, name: impl Into<String>, description: impl Into<String>, base_branch: Option<String>) -> Plan {
        let id = plans_db::next_plan_id(&self.store);
        let plan = Plan {
            id,
            name: name.into(),
            description: description.into(),
            created_at: Utc::now(),
            base_branch,
            status: PlanStatus::Draft,
        };
        plans_db::insert_plan(&self.store, plan.clone());
        plan
    }

    pub fn start_plan(&self, plan_id: &PlanId) -> Result<(), OrchestratorError> {
        if !plans_db::update_plan(&self.store, plan_id, |p| p.status = PlanStatus::Active) {
            return Err(OrchestratorError::PlanNotFound(plan_id.clone()));
        }
        plans_db::set_active_plan_id(&self.store, Some(plan_id.clone()));
        let _ = self.events.send(OrchestratorEvent::PlanStarted(plan_id.clone()));
        Ok(())
    }

    pub fn pause_plan(&self, plan_id: &PlanId) -> Result<(), OrchestratorError> {
        if !plans_db::update_plan(&self.store, plan_id, |p| p.status = PlanStatus::Paused) {
            return Err(OrchestratorError::PlanNotFound(plan_id.clone()));
        }
        let _ = self.events.send(OrchestratorEvent::PlanPaused(plan_id.clone()));
        Ok(())
    }

    pub fn resume_plan(&self, plan_id: &PlanId) -> Result<(), OrchestratorError> {
        if !plans_db::update_plan(&self.store, plan_id, |p| p.status = PlanStatus::Active) {
            return Err(OrchestratorError::PlanNotFound(plan_id.clone()));
        }
        let _ = self.events.send(OrchestratorEvent::PlanResumed(plan_id.clone()));
        Ok(())
    }

    fn maybe_complete_plan(&self, plan_id: &PlanId) {
        if tasks_db::is_plan_complete(&self.store, plan_id) {
            plans_db::update_plan(&self.store, plan_id, |p| p.status = PlanStatus::Completed);
            let _ = self.events.send(OrchestratorEvent::PlanCompleted(plan_id.clone()));
        }
    }

    // -- Tasks --------------------------------------------------------

    /// Assign a `task-N` id, sanitize and store the name, validate the
    /// resulting dependency graph is acyclic, persist. Rejects on cycle.
    pub fn add_task(&self, opts: AddTaskOptions) -> Result<Task, OrchestratorError> {
        let id = tasks_db::next_task_id(&self.store);
        let sanitized_name = sanitize_branch_name(&opts.name);

        let task = Task {
            id: id.clone(),
            name: sanitized_name,
            description: opts.description,
            priority: opts.priority,
            dependencies: opts.dependencies,
            plan_id: opts.plan_id,
            base_branch: opts.base_branch,
            model_id: opts.model_id,
            agent_type: opts.agent_type,
            target_files: opts.target_files,
            state: TaskState::Pending,
            error_message: None,
            parent_worker_id: None,
            history: Vec::new(),
        };

        let mut all_tasks = tasks_db::list_tasks(&self.store);
        all_tasks.push(task.clone());
        if let Some(cycle) = find_cycle(&all_tasks) {
            return Err(OrchestratorError::DependencyCycle(cycle));
        }

        tasks_db::insert_task(&self.store, task.clone());
        Ok(task)
    }

    /// Tasks of `plan_id` whose state is pending and every dependency is
    /// completed.
    pub fn ready_tasks(&self, plan_id: &PlanId) -> Vec<Task> {
        tasks_db::ready_tasks(&self.store, plan_id)
    }

    /// Deploy every ready task in `plan_id`, up to `maxParallelSubTasks`
    /// concurrently.
    pub async fn deploy_all(self: &Arc<Self>, plan_id: &PlanId) -> Vec<Result<Worker, OrchestratorError>> {
        let ready = self.ready_tasks(plan_id);
        let mut results = Vec::with_capacity(ready.len());
        for chunk in ready.chunks(self.max_parallel_sub_tasks.max(1)) {
            let mut handles = Vec::new();
            for task in chunk {
                let this = Arc::clone(self);
                let task_id = task.id.clone();
                handles.push(tokio::spawn(async move { this.deploy(&task_id).await }));
            }
            for handle in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(join_err) => error!(%join_err, "deploy task panicked"),
                }
            }
        }
        results
    }

    /// Resolve the base branch, create a worktree, construct a Worker,
    /// move the task pending -> queued -> running, and start the
    /// `ModelRunner` asynchronously.
    pub async fn deploy(self: &Arc<Self>, task_id: &TaskId) -> Result<Worker, OrchestratorError> {
        let task = tasks_db::get_task(&self.store, task_id).ok_or_else(|| OrchestratorError::TaskNotFound(task_id.clone()))?;
        if task.state != TaskState::Pending {
            return Err(OrchestratorError::NotPending(task_id.clone()));
        }

        let agent_type = task.agent_type.clone().unwrap_or_else(|| "agent".to_string());
        let prompt = format!("Complete task {task_id}");
        let spawner = orchestrator_spawner_id();
        self.safety
            .check_admission(&spawner, 0, SpawnContext::Orchestrator, &agent_type, &prompt, &[])?;

        let base_branch = self.resolve_base_branch(&task)?;
        let sanitized_name = sanitize_branch_name(&task.name);
        let worktree = self.worktrees.create_worktree(&sanitized_name, &base_branch)?;

        self.transition_task(task_id, TaskState::Queued)?;
        let _ = self.events.send(OrchestratorEvent::TaskQueued(task_id.clone()));

        let now = Utc::now();
        let worker = Worker {
            id: new_worker_id(),
            name: task.name.clone(),
            task_ref: task_id.clone(),
            worktree_path: worktree.path.clone(),
            branch_name: sanitized_name,
            base_branch,
            created_at: now,
            last_activity_at: now,
            status: WorkerStatus::Running,
            messages: Vec::new(),
            pending_approvals: Vec::new(),
            parent_worker_id: None,
            plan_id: task.plan_id.clone(),
            depth: 0,
        };
        workers_db::upsert_worker(&self.store, worker.clone());

        self.safety.record_spawn(
            &spawner,
            AncestryLink {
                sub_task_id: SubTaskId(task_id.0.clone()),
                parent_sub_task_id: None,
                worker_id: spawner.clone(),
                agent_type,
                prompt_hash: hash_prompt(&prompt),
            },
        );

        self.transition_task(task_id, TaskState::Running)?;
        let _ = self.events.send(OrchestratorEvent::TaskStarted(task_id.clone()));

        self.spawn_run(task_id.clone(), worker.id.clone(), worker.worktree_path.clone(), task.agent_type.clone());

        Ok(worker)
    }

    fn resolve_base_branch(&self, task: &Task) -> Result<String, OrchestratorError> {
        if let Some(branch) = &task.base_branch {
            return Ok(branch.clone());
        }
        if let Some(plan_id) = &task.plan_id {
            if let Some(plan) = plans_db::get_plan(&self.store, plan_id) {
                if let Some(branch) = plan.base_branch {
                    return Ok(branch);
                }
            }
        }
        Ok(self.worktrees.detect_default_branch()?)
    }

    fn spawn_run(self: &Arc<Self>, task_id: TaskId, worker_id: WorkerId, worktree_path: std::path::PathBuf, agent_type: Option<String>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.health.execution_start(&worker_id);
            let options = RunOptions {
                working_dir: worktree_path,
                agent_name: agent_type.clone().unwrap_or_else(|| "agent".to_string()),
                backend: conclave_store::models::AgentBackend::Copilot,
                slash_command: None,
                prompt: format!("Complete task {task_id}"),
                env_vars: std::collections::HashMap::new(),
                may_spawn_sub_tasks: true,
            };
            let outcome = this.model_runner.run(options).await;
            this.health.execution_end(&worker_id);
            match outcome {
                Ok(_handle) => {
                    this.health.success(&worker_id);
                    this.finish_task(&task_id, &worker_id, TaskState::Completed, None);
                }
                Err(err) => {
                    this.health.error(&worker_id);
                    warn!(%task_id, %err, "model runner failed to start");
                    this.finish_task(&task_id, &worker_id, TaskState::Failed, Some(err.to_string()));
                }
            }
        });
    }

    fn finish_task(&self, task_id: &TaskId, worker_id: &WorkerId, state: TaskState, error_message: Option<String>) {
        self.safety.terminalize(&orchestrator_spawner_id(), &SubTaskId(task_id.0.clone()));
        if let Err(err) = self.transition_task(task_id, state) {
            error!(%task_id, %err, "failed to apply terminal task transition");
        }
        tasks_db::update_task(&self.store, task_id, |t| t.error_message = error_message.clone());
        let worker_status = match state {
            TaskState::Completed => WorkerStatus::Completed,
            _ => WorkerStatus::Error,
        };
        workers_db::update_worker(&self.store, worker_id, |w| {
            w.status = worker_status;
            w.last_activity_at = Utc::now();
        });

        match state {
            TaskState::Completed => {
                let _ = self.events.send(OrchestratorEvent::TaskCompleted(task_id.clone()));
            }
            _ => {
                let message = error_message.unwrap_or_else(|| "unknown error".to_string());
                let _ = self.events.send(OrchestratorEvent::TaskFailed(task_id.clone(), message.clone()));
                let _ = self.events.send(OrchestratorEvent::WorkerError(worker_id.clone(), message));
            }
        }

        if let Some(task) = tasks_db::get_task(&self.store, task_id) {
            if let Some(plan_id) = task.plan_id {
                self.maybe_complete_plan(&plan_id);
            }
        }
    }

    fn transition_task(&self, task_id: &TaskId, to: TaskState) -> Result<(), OrchestratorError> {
        let task = tasks_db::get_task(&self.store, task_id).ok_or_else(|| OrchestratorError::TaskNotFound(task_id.clone()))?;
        match TaskStateMachine::transition(task.state, to, self.transition_policy) {
            Ok(true) => {
                tasks_db::record_transition(
                    &self.store,
                    task_id,
                    TransitionRecord {
                        from: task.state,
                        to,
                        at: Utc::now(),
                        forced: false,
                    },
                );
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%task_id, %err, "invalid task transition rejected");
            }
        }
        Ok(())
    }

    // -- Worker operations -------------------------------------------

    /// Route a follow-up message to `worker_id` through the message bus
    /// rather than mutating the store directly -- the registered default
    /// handler (installed in `new`) performs the actual idle->running
    /// wake and activity touch once the bus delivers it.
    pub async fn send_message_to_worker(&self, worker_id: &WorkerId, message: impl Into<String>) -> Result<(), OrchestratorError> {
        let worker = workers_db::get_worker(&self.store, worker_id).ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.clone()))?;
        let queue_message = QueueMessage {
            id: new_message_id(),
            timestamp: Utc::now(),
            priority: Priority::Normal,
            plan_id: worker.plan_id.clone(),
            task_id: Some(worker.task_ref.clone()),
            worker_id: Some(worker_id.clone()),
            worktree_path: Some(worker.worktree_path.clone()),
            parent_agent_id: None,
            sub_task_id: None,
            depth: Some(worker.depth),
            owner: Some(Owner {
                owner_type: OwnerType::Worker,
                owner_id: worker_id.to_string(),
                session_uri: None,
            }),
            message_type: MessageType::Refinement,
            content: serde_json::json!({ "text": message.into() }),
        };
        self.bus.enqueue(queue_message).await;
        Ok(())
    }

    /// Admission-controlled, agent-initiated sub-task spawn: runs
    /// `SafetyLimits`/file-conflict checks inside `SubTaskManager`,
    /// then drives the sub-task through the same `ModelRunner` contract
    /// a top-level deploy uses.
    pub async fn spawn_sub_task(self: &Arc<Self>, opts: SpawnSubTaskOptions) -> Result<SubTask, OrchestratorError> {
        let worker = workers_db::get_worker(&self.store, &opts.parent_worker_id)
            .ok_or_else(|| OrchestratorError::WorkerNotFound(opts.parent_worker_id.clone()))?;

        let conflicts = self.sub_tasks.check_file_conflicts(&opts.target_files, None);
        if !conflicts.is_empty() {
            return Err(OrchestratorError::FileConflict(conflicts));
        }

        let sub_task = self.sub_tasks.create_sub_task(CreateSubTaskOptions {
            parent_worker_id: opts.parent_worker_id.clone(),
            parent_task_id: worker.task_ref.clone(),
            plan_id: worker.plan_id.clone(),
            worktree_path: worker.worktree_path.clone(),
            base_branch: worker.base_branch.clone(),
            agent_type: opts.agent_type,
            prompt: opts.prompt,
            expected_output: opts.expected_output,
            parent_depth: worker.depth,
            spawn_context: SpawnContext::Agent,
            target_files: opts.target_files,
            inherited_permissions: None,
            parent_sub_task_id: None,
        })?;

        self.spawn_sub_task_run(sub_task.clone());
        Ok(sub_task)
    }

    fn spawn_sub_task_run(self: &Arc<Self>, sub_task: SubTask) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _token = match this.sub_tasks.begin_execution(&sub_task.id) {
                Ok(token) => token,
                Err(err) => {
                    error!(sub_task_id = %sub_task.id, %err, "failed to begin sub-task execution");
                    return;
                }
            };

            this.health.execution_start(&sub_task.parent_worker_id);
            let max_depth = this.safety.config().max_depth(sub_task.spawn_context);
            let options = RunOptions {
                working_dir: sub_task.worktree_path.clone(),
                agent_name: sub_task.parsed_agent_type.agent_name.clone(),
                backend: sub_task.parsed_agent_type.backend,
                slash_command: sub_task.parsed_agent_type.slash_command.clone(),
                prompt: build_sub_task_prompt(&sub_task, max_depth),
                env_vars: HashMap::new(),
                may_spawn_sub_tasks: sub_task.depth < max_depth,
            };
            let outcome = this.model_runner.run(options).await;
            this.health.execution_end(&sub_task.parent_worker_id);

            match outcome {
                Ok(_handle) => {
                    this.health.success(&sub_task.parent_worker_id);
                    let _ = this.sub_tasks.complete_execution(
                        &sub_task.id,
                        SubTaskResult {
                            kind: SubTaskResultKind::Completed,
                            message: "completed".to_string(),
                            commit_message: None,
                        },
                    );
                }
                Err(err) => {
                    this.health.error(&sub_task.parent_worker_id);
                    warn!(sub_task_id = %sub_task.id, %err, "sub-task model runner failed");
                    let _ = this.sub_tasks.fail_execution(&sub_task.id, ExecutionErrorKind::Unknown, err.to_string());
                }
            }
        });
    }

    pub fn handle_approval(
        &self,
        worker_id: &WorkerId,
        approval_id: &str,
        _approve: bool,
        _clarification: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let worker = workers_db::get_worker(&self.store, worker_id).ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.clone()))?;
        if !worker.pending_approvals.iter().any(|a| a.id == approval_id) {
            return Err(OrchestratorError::ApprovalNotFound(approval_id.to_string()));
        }
        workers_db::update_worker(&self.store, worker_id, |w| {
            w.pending_approvals.retain(|a| a.id != approval_id);
            w.last_activity_at = Utc::now();
        });
        Ok(())
    }

    pub fn register_pending_approval(&self, worker_id: &WorkerId, approval: PendingApproval) -> Result<(), OrchestratorError> {
        let updated = workers_db::update_worker(&self.store, worker_id, |w| {
            w.pending_approvals.push(approval.clone());
            w.status = WorkerStatus::WaitingApproval;
        });
        if !updated {
            return Err(OrchestratorError::WorkerNotFound(worker_id.clone()));
        }
        Ok(())
    }

    pub fn pause_worker(&self, worker_id: &WorkerId) -> Result<(), OrchestratorError> {
        self.set_worker_status(worker_id, WorkerStatus::Paused)
    }

    pub fn resume_worker(&self, worker_id: &WorkerId) -> Result<(), OrchestratorError> {
        self.set_worker_status(worker_id, WorkerStatus::Running)
    }

    fn set_worker_status(&self, worker_id: &WorkerId, status: WorkerStatus) -> Result<(), OrchestratorError> {
        let updated = workers_db::update_worker(&self.store, worker_id, |w| {
            w.status = status;
            w.last_activity_at = Utc::now();
        });
        if !updated {
            return Err(OrchestratorError::WorkerNotFound(worker_id.clone()));
        }
        Ok(())
    }

    /// Cancel the current turn without changing the worker's terminal
    /// state -- the `ModelRunner` is responsible for honoring this.
    pub fn interrupt_worker(&self, worker_id: &WorkerId) -> Result<(), OrchestratorError> {
        if workers_db::get_worker(&self.store, worker_id).is_none() {
            return Err(OrchestratorError::WorkerNotFound(worker_id.clone()));
        }
        info!(%worker_id, "interrupt requested");
        Ok(())
    }

    /// Discard a worker and its worktree without pushing.
    pub fn conclude_worker(&self, worker_id: &WorkerId) -> Result<(), OrchestratorError> {
        let worker = workers_db::get_worker(&self.store, worker_id).ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.clone()))?;
        self.worktrees.remove_worktree(&worker.worktree_path)?;
        workers_db::remove_worker(&self.store, worker_id);
        Ok(())
    }

    /// Finalize via the completion/push path (commit -> push -> worktree
    /// remove), then remove from the workers map. A push failure leaves
    /// the worker in its completed state, not removed, so the caller can
    /// retry.
    pub fn complete_worker(&self, worker_id: &WorkerId) -> Result<(), OrchestratorError> {
        let worker = workers_db::get_worker(&self.store, worker_id).ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.clone()))?;
        match self.worktrees.complete_and_push(&worker.worktree_path, &worker.branch_name, &worker.name) {
            Ok(()) => {
                workers_db::remove_worker(&self.store, worker_id);
                Ok(())
            }
            Err(err) => {
                warn!(%worker_id, %err, "push failed; worker remains completed for retry");
                Err(OrchestratorError::Infrastructure(err))
            }
        }
    }

    /// Identify the sub-tasks in scope for an emergency stop, per
    /// [`crate::safety::emergency_stop_targets`]. The CLI's
    /// `emergency-stop` command uses this to report what it is about to
    /// tear down before it actually kills the owning workers.
    pub fn emergency_stop_targets(&self, scope: crate::safety::EmergencyScope, worker_id: Option<&WorkerId>, plan_id: Option<&PlanId>) -> Vec<SubTaskId> {
        let store = Arc::clone(&self.store);
        crate::safety::emergency_stop_targets(&self.safety, scope, worker_id, plan_id, move |w| {
            workers_db::get_worker(&store, w).and_then(|worker| worker.plan_id)
        })
    }

    /// Cancel, optionally remove the worktree, optionally return the
    /// associated task to pending for retry.
    pub fn kill_worker(&self, worker_id: &WorkerId, remove_worktree: bool, retry_task: bool) -> Result<(), OrchestratorError> {
        let worker = workers_db::get_worker(&self.store, worker_id).ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.clone()))?;
        if remove_worktree {
            self.worktrees.remove_worktree(&worker.worktree_path)?;
        }
        workers_db::remove_worker(&self.store, worker_id);
        if retry_task {
            self.retry_task(&worker.task_ref)?;
        }
        Ok(())
    }

    pub fn cancel_task(&self, task_id: &TaskId) -> Result<(), OrchestratorError> {
        self.transition_task(task_id, TaskState::Cancelled)
    }

    pub fn retry_task(&self, task_id: &TaskId) -> Result<(), OrchestratorError> {
        self.transition_task(task_id, TaskState::Pending)
    }
}

/// Default message-bus handler: wakes an idle worker and touches its
/// activity/health state on delivery of any message addressed to it.
struct WorkerWakeHandler {
    store: Arc<Store>,
    health: Arc<HealthMonitor>,
}

#[async_trait]
impl MessageHandler for WorkerWakeHandler {
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()> {
        let Some(owner) = &message.owner else { return Ok(()) };
        let worker_id = WorkerId(owner.owner_id.clone());
        workers_db::update_worker(&self.store, &worker_id, |w| {
            w.last_activity_at = Utc::now();
            if w.status == WorkerStatus::Idle {
                w.status = WorkerStatus::Running;
            }
        });
        self.health.success(&worker_id);
        Ok(())
    }
}

/// Detect a cycle in the dependency graph via iterative Kahn's
/// algorithm; returns the ids still unresolved (the cyclic set) if one
/// exists.
fn find_cycle(tasks: &[Task]) -> Option<Vec<TaskId>> {
    let mut in_degree: std::collections::HashMap<&TaskId, usize> = tasks.iter().map(|t| (&t.id, 0)).collect();
    let mut dependents: std::collections::HashMap<&TaskId, Vec<&TaskId>> = std::collections::HashMap::new();

    for task in tasks {
        for dep in &task.dependencies {
            *in_degree.entry(&task.id).or_insert(0) += 1;
            dependents.entry(dep).or_default().push(&task.id);
        }
    }

    let mut queue: VecDeque<&TaskId> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| *id).collect();
    let mut visited: HashSet<&TaskId> = HashSet::new();

    while let Some(id) = queue.pop_front() {
        visited.insert(id);
        if let Some(deps) = dependents.get(id) {
            for &dependent in deps {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if visited.len() == tasks.len() {
        None
    } else {
        Some(
            tasks
                .iter()
                .map(|t| &t.id)
                .filter(|id| !visited.contains(*id))
                .cloned()
                .collect(),
        )
    }
}
