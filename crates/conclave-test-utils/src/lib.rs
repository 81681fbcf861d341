//! Shared test fixtures: a real-git-repo helper (mirroring the per-file
//! `create_temp_repo` helper the teacher duplicates in every worktree
//! test module, centralized here instead), an env-var test mutex, and
//! builder functions for the data model so component tests don't
//! hand-roll fixtures.

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, OnceLock};

use chrono::Utc;
use conclave_store::models::{
    new_worker_id, AgentBackend, ParsedAgentType, Plan, PlanId, PlanStatus, Priority, SpawnContext,
    SubTask, SubTaskId, Task, TaskId, TaskState, Worker, WorkerId, WorkerStatus,
};
use tempfile::TempDir;

/// Serializes tests that mutate process environment variables (config
/// resolution, XDG paths). Mirrors the teacher's `test_util::lock_env`.
static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

pub fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// Create a temporary git repository with an initial commit, returning
/// the `TempDir` guard (keep it alive for the test's duration) and the
/// repo's path.
pub fn create_temp_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    let run = |args: &[&str]| {
        let output = Command::new("git")
            .args(args)
            .current_dir(&repo_path)
            .output()
            .unwrap_or_else(|e| panic!("git {} failed: {e}", args.join(" ")));
        assert!(output.status.success(), "git {} failed", args.join(" "));
    };

    run(&["init", "-b", "main"]);
    run(&["config", "user.email", "test@conclave.dev"]);
    run(&["config", "user.name", "Conclave Test"]);
    std::fs::write(repo_path.join("README.md"), "# Test\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-m", "Initial commit"]);

    (dir, repo_path)
}

pub fn sample_plan(id: &str) -> Plan {
    Plan {
        id: PlanId(id.to_string()),
        name: format!("plan {id}"),
        description: String::new(),
        created_at: Utc::now(),
        base_branch: None,
        status: PlanStatus::Draft,
    }
}

pub fn sample_task(id: &str, plan_id: &str, deps: Vec<&str>) -> Task {
    Task {
        id: TaskId(id.to_string()),
        name: id.to_string(),
        description: String::new(),
        priority: Priority::Normal,
        dependencies: deps.into_iter().map(|d| TaskId(d.to_string())).collect(),
        plan_id: Some(PlanId(plan_id.to_string())),
        base_branch: None,
        model_id: None,
        agent_type: None,
        target_files: vec![],
        state: TaskState::Pending,
        error_message: None,
        parent_worker_id: None,
        history: vec![],
    }
}

pub fn sample_worker(task_id: &str, plan_id: &str, depth: u8) -> Worker {
    let now = Utc::now();
    Worker {
        id: new_worker_id(),
        name: task_id.to_string(),
        task_ref: TaskId(task_id.to_string()),
        worktree_path: PathBuf::from("/tmp/conclave-test-worktree"),
        branch_name: task_id.to_string(),
        base_branch: "main".to_string(),
        created_at: now,
        last_activity_at: now,
        status: WorkerStatus::Running,
        messages: vec![],
        pending_approvals: vec![],
        parent_worker_id: None,
        plan_id: Some(PlanId(plan_id.to_string())),
        depth,
    }
}

pub fn sample_subtask(
    id: &str,
    parent_worker_id: WorkerId,
    parent_task_id: &str,
    depth: u8,
    spawn_context: SpawnContext,
    agent_type: &str,
    prompt: &str,
) -> SubTask {
    let now = Utc::now();
    SubTask {
        id: SubTaskId(id.to_string()),
        parent_worker_id,
        parent_task_id: TaskId(parent_task_id.to_string()),
        plan_id: None,
        worktree_path: PathBuf::from("/tmp/conclave-test-worktree"),
        base_branch: "main".to_string(),
        agent_type: agent_type.to_string(),
        parsed_agent_type: ParsedAgentType {
            backend: AgentBackend::Copilot,
            agent_name: agent_type.trim_start_matches('@').to_string(),
            slash_command: None,
        },
        prompt: prompt.to_string(),
        expected_output: String::new(),
        depth,
        status: TaskState::Pending,
        target_files: vec![],
        created_at: now,
        completed_at: None,
        result: None,
        spawn_context,
        inherited_permissions: None,
        parent_sub_task_id: None,
        history: vec![],
    }
}
