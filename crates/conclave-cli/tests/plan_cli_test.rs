//! Integration tests exercising the plan/task/deploy lifecycle through
//! `OrchestratorCore` directly, the same surface the `conclave plan` /
//! `conclave task` / `conclave deploy` commands drive.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use conclave_core::model_runner::{ModelRunner, RunEvent, RunHandle, RunOptions};
use conclave_core::orchestrator::{AddTaskOptions, OrchestratorCore};
use conclave_core::state::TransitionPolicy;
use conclave_core::worktree::WorktreeCoordinator;
use conclave_store::models::{AgentBackend, PlanStatus, Priority, TaskState};
use conclave_store::{queries, Store, StorePaths};
use conclave_test_utils::create_temp_repo;
use futures::Stream;
use uuid::Uuid;

/// Completes every run immediately, as if the agent did nothing and
/// exited cleanly -- enough to drive task/worker state transitions
/// without a real coding agent binary.
struct InstantRunner;

#[async_trait]
impl ModelRunner for InstantRunner {
    fn backend(&self) -> AgentBackend {
        AgentBackend::Copilot
    }

    async fn run(&self, _options: RunOptions) -> anyhow::Result<RunHandle> {
        Ok(RunHandle {
            run_id: Uuid::new_v4().to_string(),
            pid: None,
        })
    }

    fn events(&self, _handle: &RunHandle) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>> {
        Box::pin(futures::stream::empty())
    }

    async fn send(&self, _handle: &RunHandle, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_paused(&self, _handle: &RunHandle, _paused: bool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn interrupt(&self, _handle: &RunHandle) -> anyhow::Result<()> {
        Ok(())
    }

    async fn kill(&self, _handle: &RunHandle) -> anyhow::Result<()> {
        Ok(())
    }

    async fn is_running(&self, _handle: &RunHandle) -> bool {
        false
    }
}

/// Bundles a store handle alongside the orchestrator built on top of it,
/// since `OrchestratorCore` keeps its `Arc<Store>` private -- tests need
/// their own handle to assert on persisted state.
struct Fixture {
    store: Arc<Store>,
    orchestrator: Arc<OrchestratorCore>,
}

fn fixture(repo_path: &std::path::Path) -> Fixture {
    let store = Store::open(StorePaths::new(repo_path)).expect("store should open");
    let worktrees = Arc::new(WorktreeCoordinator::new(repo_path).expect("repo should be a git worktree root"));
    let orchestrator = OrchestratorCore::new(
        Arc::clone(&store),
        worktrees,
        Arc::new(InstantRunner),
        TransitionPolicy::Strict,
        4,
    );
    Fixture { store, orchestrator }
}

fn add_task(orch: &OrchestratorCore, plan_id: &conclave_store::models::PlanId, name: &str, deps: Vec<conclave_store::models::TaskId>) -> conclave_store::models::Task {
    orch.add_task(AddTaskOptions {
        name: name.to_string(),
        description: String::new(),
        priority: Priority::Normal,
        dependencies: deps,
        plan_id: Some(plan_id.clone()),
        base_branch: None,
        model_id: None,
        agent_type: None,
        target_files: Vec::new(),
    })
    .expect("task should be added")
}

#[test]
fn create_plan_starts_in_draft() {
    let (_guard, repo_path) = create_temp_repo();
    let fx = fixture(&repo_path);

    let plan = fx.orchestrator.create_plan("Test plan", "a plan for testing", Some("main".to_string()));

    assert_eq!(plan.name, "Test plan");
    assert_eq!(plan.status, PlanStatus::Draft);
    assert_eq!(plan.base_branch.as_deref(), Some("main"));
}

#[test]
fn add_task_rejects_dependency_cycles() {
    let (_guard, repo_path) = create_temp_repo();
    let fx = fixture(&repo_path);
    let plan = fx.orchestrator.create_plan("Cyclic plan", "", None);

    let a = add_task(&fx.orchestrator, &plan.id, "task-a", Vec::new());
    let b = add_task(&fx.orchestrator, &plan.id, "task-b", vec![a.id.clone()]);

    // Close the cycle directly in the store: task-a now depends on task-b.
    queries::tasks::update_task(&fx.store, &a.id, |t| t.dependencies.push(b.id.clone()));

    let err = fx
        .orchestrator
        .add_task(AddTaskOptions {
            name: "task-c".to_string(),
            description: String::new(),
            priority: Priority::Normal,
            dependencies: vec![a.id.clone()],
            plan_id: Some(plan.id.clone()),
            base_branch: None,
            model_id: None,
            agent_type: None,
            target_files: Vec::new(),
        })
        .expect_err("adding into an already-cyclic graph should fail");

    match err {
        conclave_core::orchestrator::OrchestratorError::DependencyCycle(cycle) => {
            assert!(cycle.contains(&a.id));
            assert!(cycle.contains(&b.id));
        }
        other => panic!("expected DependencyCycle, got {other:?}"),
    }
}

#[tokio::test]
async fn deploy_creates_worker_and_completes_task() {
    let (_guard, repo_path) = create_temp_repo();
    let fx = fixture(&repo_path);
    let plan = fx.orchestrator.create_plan("Deploy plan", "", Some("main".to_string()));
    fx.orchestrator.start_plan(&plan.id).unwrap();

    let task = add_task(&fx.orchestrator, &plan.id, "solo task", Vec::new());

    let worker = fx.orchestrator.deploy(&task.id).await.expect("deploy should succeed");
    assert_eq!(worker.task_ref, task.id);
    assert!(worker.worktree_path.exists());

    // spawn_run races with this assertion in a background task; give it
    // a moment to land before checking the terminal state.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stored_task = queries::tasks::get_task(&fx.store, &task.id).unwrap();
    assert_eq!(stored_task.state, TaskState::Completed);
}

#[test]
fn pause_and_resume_plan_round_trips_status() {
    let (_guard, repo_path) = create_temp_repo();
    let fx = fixture(&repo_path);
    let plan = fx.orchestrator.create_plan("Pausable plan", "", None);

    fx.orchestrator.start_plan(&plan.id).unwrap();
    fx.orchestrator.pause_plan(&plan.id).unwrap();
    let paused = queries::plans::get_plan(&fx.store, &plan.id).unwrap();
    assert_eq!(paused.status, PlanStatus::Paused);

    fx.orchestrator.resume_plan(&plan.id).unwrap();
    let resumed = queries::plans::get_plan(&fx.store, &plan.id).unwrap();
    assert_eq!(resumed.status, PlanStatus::Active);
}

#[test]
fn ready_tasks_excludes_unmet_dependencies() {
    let (_guard, repo_path) = create_temp_repo();
    let fx = fixture(&repo_path);
    let plan = fx.orchestrator.create_plan("Ready plan", "", None);

    let a = add_task(&fx.orchestrator, &plan.id, "task-a", Vec::new());
    let b = add_task(&fx.orchestrator, &plan.id, "task-b", vec![a.id.clone()]);

    let ready = fx.orchestrator.ready_tasks(&plan.id);
    assert!(ready.iter().any(|t| t.id == a.id));
    assert!(!ready.iter().any(|t| t.id == b.id));
}
