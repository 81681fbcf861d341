//! Wires a workspace root into a `Store` + `WorktreeCoordinator` +
//! `OrchestratorCore`, the trio every command operates on.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use conclave_core::health::HealthConfig;
use conclave_core::orchestrator::OrchestratorCore;
use conclave_core::state::TransitionPolicy;
use conclave_core::worktree::WorktreeCoordinator;
use conclave_store::{Store, StorePaths};

use crate::config::ConclaveConfig;
use crate::runner::CliAgentRunner;

pub struct Context {
    pub store: Arc<Store>,
    pub worktrees: Arc<WorktreeCoordinator>,
    pub orchestrator: Arc<OrchestratorCore>,
}

impl Context {
    pub fn open(config: &ConclaveConfig) -> Result<Self> {
        let paths = StorePaths::new(config.workspace_root.clone());
        let store = Store::open(paths)
            .with_context(|| format!("failed to open store at {}", config.workspace_root.display()))?;
        let worktrees = Arc::new(
            WorktreeCoordinator::new(&config.workspace_root)
                .with_context(|| format!("{} is not a git repository", config.workspace_root.display()))?,
        );
        let runner = Arc::new(CliAgentRunner::from_env());
        let orchestrator = OrchestratorCore::new(
            Arc::clone(&store),
            Arc::clone(&worktrees),
            runner,
            TransitionPolicy::Strict,
            config.safety.max_parallel_sub_tasks,
            config.safety.clone(),
            HealthConfig::default(),
        );
        Ok(Self {
            store,
            worktrees,
            orchestrator,
        })
    }

    /// Flush pending writes to the state and queue files before exit.
    pub fn save(&self) -> Result<()> {
        self.store.save_now()
    }
}
