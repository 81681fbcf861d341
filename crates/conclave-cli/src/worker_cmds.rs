//! Operator-mode CLI handlers for `conclave worker` subcommands.

use anyhow::{Context as _, Result};
use conclave_core::orchestrator::SpawnSubTaskOptions;
use conclave_store::models::WorkerId;
use conclave_store::queries::workers as workers_db;

use crate::context::Context;
use crate::WorkerCommands;

pub async fn run_worker_command(command: WorkerCommands, ctx: &Context) -> Result<()> {
    match command {
        WorkerCommands::List => cmd_list(ctx),
        WorkerCommands::Status { worker_id } => cmd_status(ctx, &worker_id),
        WorkerCommands::Message { worker_id, message } => cmd_message(ctx, &worker_id, message).await,
        WorkerCommands::Approve { worker_id, approval_id } => cmd_decide(ctx, &worker_id, &approval_id, true, None),
        WorkerCommands::Reject {
            worker_id,
            approval_id,
            clarification,
        } => cmd_decide(ctx, &worker_id, &approval_id, false, clarification),
        WorkerCommands::Pause { worker_id } => cmd_pause(ctx, &worker_id),
        WorkerCommands::Resume { worker_id } => cmd_resume(ctx, &worker_id),
        WorkerCommands::Interrupt { worker_id } => cmd_interrupt(ctx, &worker_id),
        WorkerCommands::Conclude { worker_id } => cmd_conclude(ctx, &worker_id),
        WorkerCommands::Complete { worker_id } => cmd_complete(ctx, &worker_id),
        WorkerCommands::Kill {
            worker_id,
            keep_worktree,
            no_retry,
        } => cmd_kill(ctx, &worker_id, !keep_worktree, !no_retry),
        WorkerCommands::SpawnSubTask {
            worker_id,
            agent_type,
            prompt,
            expected_output,
            target_files,
        } => cmd_spawn_sub_task(ctx, &worker_id, agent_type, prompt, expected_output, target_files).await,
    }
}

fn cmd_list(ctx: &Context) -> Result<()> {
    let workers = workers_db::list_workers(&ctx.store);
    if workers.is_empty() {
        println!("No active workers.");
        return Ok(());
    }

    let id_w = workers.iter().map(|w| w.id.to_string().len()).max().unwrap_or(2).max(2);
    println!("{:<id_w$}  TASK            STATUS            DEPTH  BRANCH", "ID");
    for worker in &workers {
        println!(
            "{:<id_w$}  {:<14}  {:<16}  {:<5}  {}",
            worker.id, worker.task_ref, worker.status, worker.depth, worker.branch_name,
        );
    }
    Ok(())
}

fn cmd_status(ctx: &Context, worker_id: &str) -> Result<()> {
    let id = WorkerId::from(worker_id);
    let worker = workers_db::get_worker(&ctx.store, &id).with_context(|| format!("worker {worker_id} not found"))?;

    println!("Worker: {}", worker.name);
    println!("  ID:        {}", worker.id);
    println!("  Task:      {}", worker.task_ref);
    println!("  Status:    {}", worker.status);
    println!("  Depth:     {}", worker.depth);
    println!("  Branch:    {} (base {})", worker.branch_name, worker.base_branch);
    println!("  Worktree:  {}", worker.worktree_path.display());
    println!("  Created:   {}", worker.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Last seen: {}", worker.last_activity_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(parent) = &worker.parent_worker_id {
        println!("  Parent:    {parent}");
    }
    if !worker.pending_approvals.is_empty() {
        println!("  Pending approvals:");
        for approval in &worker.pending_approvals {
            println!("    [{}] {} (requested {})", approval.id, approval.description, approval.requested_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    Ok(())
}

async fn cmd_message(ctx: &Context, worker_id: &str, message: String) -> Result<()> {
    ctx.orchestrator.send_message_to_worker(&worker_id.into(), message).await?;
    println!("Message sent to worker {worker_id}.");
    Ok(())
}

async fn cmd_spawn_sub_task(
    ctx: &Context,
    worker_id: &str,
    agent_type: String,
    prompt: String,
    expected_output: Option<String>,
    target_files: Vec<String>,
) -> Result<()> {
    let sub_task = ctx
        .orchestrator
        .spawn_sub_task(SpawnSubTaskOptions {
            parent_worker_id: worker_id.into(),
            agent_type,
            prompt,
            expected_output: expected_output.unwrap_or_default(),
            target_files,
        })
        .await?;
    println!("Spawned sub-task {} under worker {worker_id}.", sub_task.id);
    Ok(())
}

fn cmd_decide(ctx: &Context, worker_id: &str, approval_id: &str, approve: bool, clarification: Option<String>) -> Result<()> {
    ctx.orchestrator
        .handle_approval(&worker_id.into(), approval_id, approve, clarification)?;
    println!(
        "Approval {approval_id} on worker {worker_id} {}.",
        if approve { "granted" } else { "rejected" }
    );
    Ok(())
}

fn cmd_pause(ctx: &Context, worker_id: &str) -> Result<()> {
    ctx.orchestrator.pause_worker(&worker_id.into())?;
    println!("Worker {worker_id} paused.");
    Ok(())
}

fn cmd_resume(ctx: &Context, worker_id: &str) -> Result<()> {
    ctx.orchestrator.resume_worker(&worker_id.into())?;
    println!("Worker {worker_id} resumed.");
    Ok(())
}

fn cmd_interrupt(ctx: &Context, worker_id: &str) -> Result<()> {
    ctx.orchestrator.interrupt_worker(&worker_id.into())?;
    println!("Interrupt requested for worker {worker_id}.");
    Ok(())
}

fn cmd_conclude(ctx: &Context, worker_id: &str) -> Result<()> {
    ctx.orchestrator.conclude_worker(&worker_id.into())?;
    println!("Worker {worker_id} concluded; worktree discarded.");
    Ok(())
}

fn cmd_complete(ctx: &Context, worker_id: &str) -> Result<()> {
    ctx.orchestrator.complete_worker(&worker_id.into())?;
    println!("Worker {worker_id} completed and pushed.");
    Ok(())
}

fn cmd_kill(ctx: &Context, worker_id: &str, remove_worktree: bool, retry_task: bool) -> Result<()> {
    ctx.orchestrator.kill_worker(&worker_id.into(), remove_worktree, retry_task)?;
    println!("Worker {worker_id} killed.");
    Ok(())
}
