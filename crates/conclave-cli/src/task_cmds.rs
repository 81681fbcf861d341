//! Operator-mode CLI handlers for `conclave task` subcommands.

use anyhow::{Context as _, Result};
use conclave_core::orchestrator::AddTaskOptions;
use conclave_store::models::{Priority, TaskId};
use conclave_store::queries::tasks as tasks_db;

use crate::context::Context;
use crate::TaskCommands;

pub fn run_task_command(command: TaskCommands, ctx: &Context) -> Result<()> {
    match command {
        TaskCommands::Add {
            plan_id,
            name,
            description,
            priority,
            depends_on,
            base_branch,
            model_id,
            agent_type,
            target_files,
        } => cmd_add(
            ctx,
            &plan_id,
            name,
            description.unwrap_or_default(),
            priority,
            depends_on,
            base_branch,
            model_id,
            agent_type,
            target_files,
        ),
        TaskCommands::List { plan_id } => cmd_list(ctx, &plan_id),
        TaskCommands::Cancel { task_id } => cmd_cancel(ctx, &task_id),
        TaskCommands::Retry { task_id } => cmd_retry(ctx, &task_id),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_add(
    ctx: &Context,
    plan_id: &str,
    name: String,
    description: String,
    priority: Priority,
    depends_on: Vec<String>,
    base_branch: Option<String>,
    model_id: Option<String>,
    agent_type: Option<String>,
    target_files: Vec<String>,
) -> Result<()> {
    let task = ctx
        .orchestrator
        .add_task(AddTaskOptions {
            name,
            description,
            priority,
            dependencies: depends_on.into_iter().map(|d| TaskId::from(d.as_str())).collect(),
            plan_id: Some(plan_id.into()),
            base_branch,
            model_id,
            agent_type,
            target_files,
        })
        .context("failed to add task")?;

    println!("Task added.");
    println!("  ID:       {}", task.id);
    println!("  Name:     {}", task.name);
    println!("  Priority: {}", task.priority);
    println!("  State:    {}", task.state);
    if !task.dependencies.is_empty() {
        let deps: Vec<String> = task.dependencies.iter().map(|d| d.to_string()).collect();
        println!("  Depends:  {}", deps.join(", "));
    }
    Ok(())
}

fn cmd_list(ctx: &Context, plan_id: &str) -> Result<()> {
    let tasks = tasks_db::list_tasks_for_plan(&ctx.store, &plan_id.into());
    if tasks.is_empty() {
        println!("No tasks found for plan {plan_id}.");
        return Ok(());
    }

    let id_w = tasks.iter().map(|t| t.id.to_string().len()).max().unwrap_or(2).max(2);
    let name_w = tasks.iter().map(|t| t.name.len()).max().unwrap_or(4).max(4);
    println!("{:<id_w$}  {:<name_w$}  STATE       PRIORITY", "ID", "NAME");
    for task in &tasks {
        println!(
            "{:<id_w$}  {:<name_w$}  {:<10}  {}",
            task.id,
            task.name,
            task.state.to_string(),
            task.priority,
        );
    }
    Ok(())
}

fn cmd_cancel(ctx: &Context, task_id: &str) -> Result<()> {
    ctx.orchestrator.cancel_task(&task_id.into())?;
    println!("Task {task_id} cancelled.");
    Ok(())
}

fn cmd_retry(ctx: &Context, task_id: &str) -> Result<()> {
    ctx.orchestrator.retry_task(&task_id.into())?;
    println!("Task {task_id} reset to pending for retry.");
    Ok(())
}
