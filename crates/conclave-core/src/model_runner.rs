//! ModelRunner -- the only remaining dependency on a third-party LLM
//! platform. The scheduler drives a worker or sub-task purely through
//! this interface; no concrete backend is implemented here, only the
//! adapter contract a backend must satisfy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use conclave_store::models::AgentBackend;
use futures::Stream;

/// One chunk of a running turn: a token, a tool call, or a terminal
/// signal. Consumed by whatever subscribes to a run's event stream
/// (the orchestrator, a sub-task's wait-for-completion loop, or a UI).
#[derive(Debug, Clone)]
pub enum RunEvent {
    Token(String),
    ToolCall { name: String, arguments: serde_json::Value },
    ToolResult { name: String, output: String },
    PermissionRequest { prompt: String },
    Completed { commit_message: Option<String> },
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub working_dir: PathBuf,
    pub agent_name: String,
    pub backend: AgentBackend,
    pub slash_command: Option<String>,
    pub prompt: String,
    pub env_vars: HashMap<String, String>,
    /// Whether this run is permitted to spawn further sub-tasks,
    /// derived from `depth < maxDepth(spawnContext)` at call time.
    pub may_spawn_sub_tasks: bool,
}

#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub commit_message: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Implemented by whatever actually drives an LLM coding agent.
/// Object-safe: every method returns a concrete or boxed type so the
/// scheduler can hold `Box<dyn ModelRunner>` / `Arc<dyn ModelRunner>`
/// without knowing the concrete backend.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    fn backend(&self) -> AgentBackend;

    /// Start a turn. Returns once the run has been accepted, not once
    /// it has finished -- progress and completion arrive via `events`.
    async fn run(&self, options: RunOptions) -> Result<RunHandle>;

    fn events(&self, handle: &RunHandle) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

    /// Deliver a user clarification or approval response to a running
    /// turn (wakes a waiting agent; see the sendMessageToWorker contract).
    async fn send(&self, handle: &RunHandle, message: &str) -> Result<()>;

    /// Cooperative pause/resume: the agent observes this flag between
    /// turns rather than being forcibly suspended.
    async fn set_paused(&self, handle: &RunHandle, paused: bool) -> Result<()>;

    /// Cancel the current turn's token without tearing down the handle.
    async fn interrupt(&self, handle: &RunHandle) -> Result<()>;

    async fn kill(&self, handle: &RunHandle) -> Result<()>;

    async fn is_running(&self, handle: &RunHandle) -> bool;
}

/// Keyed by `(backend, agentName)` so a scheduler can select the right
/// runner for a parsed agent type without hardcoding backend dispatch.
#[derive(Default)]
pub struct ModelRunnerRegistry {
    runners: HashMap<(AgentBackend, String), std::sync::Arc<dyn ModelRunner>>,
}

impl ModelRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent_name: impl Into<String>, runner: std::sync::Arc<dyn ModelRunner>) {
        self.runners.insert((runner.backend(), agent_name.into()), runner);
    }

    pub fn get(&self, backend: AgentBackend, agent_name: &str) -> Option<std::sync::Arc<dyn ModelRunner>> {
        self.runners.get(&(backend, agent_name.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct NoopRunner;

    #[async_trait]
    impl ModelRunner for NoopRunner {
        fn backend(&self) -> AgentBackend {
            AgentBackend::Copilot
        }

        async fn run(&self, _options: RunOptions) -> Result<RunHandle> {
            Ok(RunHandle {
                run_id: Uuid::new_v4().to_string(),
                pid: None,
            })
        }

        fn events(&self, _handle: &RunHandle) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>> {
            Box::pin(futures::stream::empty())
        }

        async fn send(&self, _handle: &RunHandle, _message: &str) -> Result<()> {
            Ok(())
        }

        async fn set_paused(&self, _handle: &RunHandle, _paused: bool) -> Result<()> {
            Ok(())
        }

        async fn interrupt(&self, _handle: &RunHandle) -> Result<()> {
            Ok(())
        }

        async fn kill(&self, _handle: &RunHandle) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &RunHandle) -> bool {
            false
        }
    }

    #[test]
    fn model_runner_is_object_safe() {
        let runner: Box<dyn ModelRunner> = Box::new(NoopRunner);
        assert_eq!(runner.backend(), AgentBackend::Copilot);
    }

    #[tokio::test]
    async fn noop_runner_starts_and_reports_not_running() {
        let runner = NoopRunner;
        let handle = runner
            .run(RunOptions {
                working_dir: "/tmp".into(),
                agent_name: "architect".into(),
                backend: AgentBackend::Copilot,
                slash_command: Some("/architect".into()),
                prompt: "do the thing".into(),
                env_vars: HashMap::new(),
                may_spawn_sub_tasks: true,
            })
            .await
            .unwrap();
        assert!(!runner.is_running(&handle).await);
    }

    #[test]
    fn registry_looks_up_by_backend_and_agent_name() {
        let mut registry = ModelRunnerRegistry::new();
        registry.register("architect", std::sync::Arc::new(NoopRunner));
        assert!(registry.get(AgentBackend::Copilot, "architect").is_some());
        assert!(registry.get(AgentBackend::Claude, "architect").is_none());
        assert!(registry.get(AgentBackend::Copilot, "reviewer").is_none());
    }
}
