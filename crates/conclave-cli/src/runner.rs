//! `CliAgentRunner` -- the concrete `ModelRunner` the binary wires into
//! `OrchestratorCore`. Spawns a configured coding-agent CLI (`claude` by
//! default) as a subprocess per run and waits for it to exit: `run()`
//! resolves only once the agent has finished, matching how the
//! orchestrator's `spawn_run` treats a successful `run()` call as task
//! completion. This is a deliberately thin adapter -- no streaming
//! event protocol or tool-call parsing; that belongs to a harness,
//! which is out of scope here.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use conclave_core::model_runner::{ModelRunner, RunEvent, RunHandle, RunOptions};
use conclave_store::models::AgentBackend;
use futures::Stream;
use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Spawns `agent_binary -p <prompt>` in `options.working_dir` and awaits
/// its exit. The binary path defaults to `claude`, overridable via
/// `CONCLAVE_AGENT_BINARY`.
pub struct CliAgentRunner {
    agent_binary: String,
    /// Child process ids of runs still in flight, keyed by run id, so
    /// `kill`/`interrupt`/`is_running` have something to act on.
    running: Arc<Mutex<HashMap<String, u32>>>,
}

impl CliAgentRunner {
    pub fn new(agent_binary: impl Into<String>) -> Self {
        Self {
            agent_binary: agent_binary.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("CONCLAVE_AGENT_BINARY").unwrap_or_else(|_| "claude".to_string()))
    }
}

#[async_trait]
impl ModelRunner for CliAgentRunner {
    fn backend(&self) -> AgentBackend {
        AgentBackend::Claude
    }

    async fn run(&self, options: RunOptions) -> Result<RunHandle> {
        let mut cmd = Command::new(&self.agent_binary);
        cmd.arg("-p").arg(&options.prompt);
        cmd.current_dir(&options.working_dir);
        for (key, value) in &options.env_vars {
            cmd.env(key, value);
        }
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn agent binary '{}' -- is it installed and on PATH?",
                self.agent_binary
            )
        })?;
        let pid = child.id().unwrap_or(0);
        let run_id = Uuid::new_v4().to_string();
        self.running.lock().await.insert(run_id.clone(), pid);

        let output = child.wait_with_output().await.with_context(|| {
            format!("failed to wait on agent process '{}'", self.agent_binary)
        });
        self.running.lock().await.remove(&run_id);
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            bail!(
                "agent exited with {}: {}",
                output.status,
                if stderr.is_empty() { "(no stderr)" } else { &stderr }
            );
        }

        Ok(RunHandle {
            run_id,
            pid: Some(pid),
        })
    }

    fn events(&self, _handle: &RunHandle) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>> {
        Box::pin(futures::stream::empty())
    }

    async fn send(&self, _handle: &RunHandle, _message: &str) -> Result<()> {
        bail!("sending follow-up messages mid-run is not supported by the CLI agent runner")
    }

    async fn set_paused(&self, _handle: &RunHandle, _paused: bool) -> Result<()> {
        bail!("pausing a running agent process is not supported by the CLI agent runner")
    }

    async fn interrupt(&self, handle: &RunHandle) -> Result<()> {
        self.kill(handle).await
    }

    async fn kill(&self, handle: &RunHandle) -> Result<()> {
        if let Some(pid) = self.running.lock().await.remove(&handle.run_id) {
            #[cfg(unix)]
            {
                // SAFETY: pid was returned by a child we spawned.
                unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            }
            #[cfg(not(unix))]
            let _ = pid;
        }
        Ok(())
    }

    async fn is_running(&self, handle: &RunHandle) -> bool {
        self.running.lock().await.contains_key(&handle.run_id)
    }
}
