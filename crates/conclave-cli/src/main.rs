mod config;
mod context;
mod deploy_cmd;
mod plan_cmds;
mod runner;
mod safety_cmd;
mod task_cmds;
mod worker_cmds;
mod worktree_cmds;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use conclave_store::models::Priority;

use config::{ConclaveConfig, ConfigFile, GitSection, WorkspaceSection};
use context::Context;

#[derive(Parser)]
#[command(name = "conclave", about = "Hierarchical LLM coding agent orchestrator")]
struct Cli {
    /// Workspace root (overrides CONCLAVE_WORKSPACE env var and the config file)
    #[arg(long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a conclave config file
    Init {
        /// Workspace root to record as the default
        #[arg(long)]
        workspace: Option<String>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Deploy a single ready task to a worker
    Deploy {
        /// Task ID to deploy
        task_id: String,
    },
    /// Deploy every ready task in a plan, up to the configured parallelism cap
    DeployAll {
        /// Plan ID to deploy
        plan_id: String,
    },
    /// Worker management
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Worktree management
    Worktree {
        #[command(subcommand)]
        command: WorktreeCommands,
    },
    /// Kill every worker in scope without pushing their branches
    EmergencyStop {
        /// Restrict the stop to one plan (omit to stop every worker)
        plan_id: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Create a new plan
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        base_branch: Option<String>,
    },
    /// List all plans
    List,
    /// Show plan and task detail
    Show { plan_id: String },
    /// Mark a plan active and set it as the active plan
    Start { plan_id: String },
    /// Pause an active plan
    Pause { plan_id: String },
    /// Resume a paused plan
    Resume { plan_id: String },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Add a task to a plan
    Add {
        plan_id: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// Task IDs this task depends on
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        #[arg(long)]
        base_branch: Option<String>,
        #[arg(long)]
        model_id: Option<String>,
        #[arg(long)]
        agent_type: Option<String>,
        /// Glob patterns this task expects to touch, for file-conflict detection
        #[arg(long = "target-file")]
        target_files: Vec<String>,
    },
    /// List tasks in a plan
    List { plan_id: String },
    /// Cancel a task
    Cancel { task_id: String },
    /// Reset a failed or cancelled task to pending
    Retry { task_id: String },
}

#[derive(Subcommand)]
pub enum WorkerCommands {
    /// List active workers
    List,
    /// Show detail for one worker
    Status { worker_id: String },
    /// Send a follow-up message to a worker, waking it if idle
    Message { worker_id: String, message: String },
    /// Approve a pending tool-use approval
    Approve { worker_id: String, approval_id: String },
    /// Reject a pending tool-use approval, with optional clarification
    Reject {
        worker_id: String,
        approval_id: String,
        #[arg(long)]
        clarification: Option<String>,
    },
    /// Pause a worker
    Pause { worker_id: String },
    /// Resume a paused worker
    Resume { worker_id: String },
    /// Interrupt a worker's current turn
    Interrupt { worker_id: String },
    /// Discard a worker and its worktree without pushing
    Conclude { worker_id: String },
    /// Commit, push, and retire a worker
    Complete { worker_id: String },
    /// Kill a worker
    Kill {
        worker_id: String,
        /// Leave the worktree in place instead of removing it
        #[arg(long)]
        keep_worktree: bool,
        /// Do not reset the worker's task back to pending
        #[arg(long)]
        no_retry: bool,
    },
    /// Spawn a sub-task under a worker, as if the worker's agent had requested it
    SpawnSubTask {
        worker_id: String,
        agent_type: String,
        prompt: String,
        #[arg(long)]
        expected_output: Option<String>,
        /// Glob patterns this sub-task expects to touch, for file-conflict detection
        #[arg(long = "target-file")]
        target_files: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum WorktreeCommands {
    /// List worktrees under management
    List,
    /// Run the parent/child pull-merge protocol between two worktrees
    PullMerge {
        parent: PathBuf,
        child: PathBuf,
        /// Leave the child's branch behind after a successful merge
        #[arg(long)]
        no_cleanup: bool,
    },
    /// Remove a worktree
    Remove { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { workspace, force } = cli.command {
        return cmd_init(workspace, force);
    }

    let resolved = ConclaveConfig::resolve(cli.workspace.as_deref())?;
    let ctx = Context::open(&resolved)?;

    let result = run_command(cli.command, &ctx).await;
    ctx.save().context("failed to flush store on exit")?;
    result
}

async fn run_command(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Init { .. } => unreachable!("handled before context was opened"),
        Commands::Plan { command } => plan_cmds::run_plan_command(command, ctx),
        Commands::Task { command } => task_cmds::run_task_command(command, ctx),
        Commands::Deploy { task_id } => deploy_cmd::run_deploy(ctx, &task_id).await,
        Commands::DeployAll { plan_id } => deploy_cmd::run_deploy_all(ctx, &plan_id).await,
        Commands::Worker { command } => worker_cmds::run_worker_command(command, ctx).await,
        Commands::Worktree { command } => worktree_cmds::run_worktree_command(command, ctx),
        Commands::EmergencyStop { plan_id } => safety_cmd::run_emergency_stop(ctx, plan_id),
    }
}

fn cmd_init(workspace: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        anyhow::bail!("config file already exists at {} (use --force to overwrite)", path.display());
    }

    let config = ConfigFile {
        workspace: WorkspaceSection { root: workspace },
        limits: Default::default(),
        git: GitSection { default_base_branch: None },
    };
    config::save_config(&config)?;
    println!("Wrote config to {}", path.display());
    Ok(())
}
