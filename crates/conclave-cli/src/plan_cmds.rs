//! Operator-mode CLI handlers for `conclave plan` subcommands.
//!
//! Implements:
//! - `conclave plan create <name>`      -- create a draft plan
//! - `conclave plan list`               -- list all plans
//! - `conclave plan show <plan-id>`     -- show plan + task detail
//! - `conclave plan start/pause/resume <plan-id>`

use anyhow::{Context as _, Result};
use conclave_store::models::PlanId;
use conclave_store::queries::tasks as tasks_db;

use crate::context::Context;
use crate::PlanCommands;

pub fn run_plan_command(command: PlanCommands, ctx: &Context) -> Result<()> {
    match command {
        PlanCommands::Create {
            name,
            description,
            base_branch,
        } => cmd_create(ctx, &name, description.as_deref(), base_branch),
        PlanCommands::List => cmd_list(ctx),
        PlanCommands::Show { plan_id } => cmd_show(ctx, &plan_id),
        PlanCommands::Start { plan_id } => cmd_start(ctx, &plan_id),
        PlanCommands::Pause { plan_id } => cmd_pause(ctx, &plan_id),
        PlanCommands::Resume { plan_id } => cmd_resume(ctx, &plan_id),
    }
}

fn cmd_create(ctx: &Context, name: &str, description: Option<&str>, base_branch: Option<String>) -> Result<()> {
    let plan = ctx
        .orchestrator
        .create_plan(name, description.unwrap_or_default(), base_branch);

    println!("Plan created.");
    println!("  ID:           {}", plan.id);
    println!("  Name:         {}", plan.name);
    println!("  Status:       {}", plan.status);
    if let Some(branch) = &plan.base_branch {
        println!("  Base branch:  {branch}");
    }
    Ok(())
}

fn cmd_list(ctx: &Context) -> Result<()> {
    let plans = conclave_store::queries::plans::list_plans(&ctx.store);
    if plans.is_empty() {
        println!("No plans found. Use `conclave plan create <name>` to create one.");
        return Ok(());
    }

    let id_w = plans.iter().map(|p| p.id.to_string().len()).max().unwrap_or(2).max(2);
    let name_w = plans.iter().map(|p| p.name.len()).max().unwrap_or(4).max(4);

    println!("{:<id_w$}  {:<name_w$}  STATUS     TASKS", "ID", "NAME");
    for plan in &plans {
        let tasks = tasks_db::list_tasks_for_plan(&ctx.store, &plan.id);
        println!(
            "{:<id_w$}  {:<name_w$}  {:<9}  {}",
            plan.id,
            plan.name,
            plan.status.to_string(),
            tasks.len(),
        );
    }
    Ok(())
}

fn cmd_show(ctx: &Context, plan_id_str: &str) -> Result<()> {
    let plan_id = PlanId::from(plan_id_str);
    let plan = conclave_store::queries::plans::get_plan(&ctx.store, &plan_id)
        .with_context(|| format!("plan {plan_id} not found"))?;

    println!("Plan: {}", plan.name);
    println!("  ID:           {}", plan.id);
    println!("  Status:       {}", plan.status);
    println!("  Created:      {}", plan.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(description) = (!plan.description.is_empty()).then_some(&plan.description) {
        println!("  Description:  {description}");
    }
    if let Some(branch) = &plan.base_branch {
        println!("  Base branch:  {branch}");
    }

    let tasks = tasks_db::list_tasks_for_plan(&ctx.store, &plan_id);
    println!();
    println!("Tasks: {}", tasks.len());
    for task in &tasks {
        println!("  [{}] {} ({})", task.state, task.name, task.id);
        if !task.dependencies.is_empty() {
            let deps: Vec<String> = task.dependencies.iter().map(|d| d.to_string()).collect();
            println!("      depends on: {}", deps.join(", "));
        }
        if let Some(err) = &task.error_message {
            println!("      error: {err}");
        }
    }
    Ok(())
}

fn cmd_start(ctx: &Context, plan_id_str: &str) -> Result<()> {
    let plan_id = PlanId::from(plan_id_str);
    ctx.orchestrator.start_plan(&plan_id)?;
    println!("Plan {plan_id} started.");
    Ok(())
}

fn cmd_pause(ctx: &Context, plan_id_str: &str) -> Result<()> {
    let plan_id = PlanId::from(plan_id_str);
    ctx.orchestrator.pause_plan(&plan_id)?;
    println!("Plan {plan_id} paused.");
    Ok(())
}

fn cmd_resume(ctx: &Context, plan_id_str: &str) -> Result<()> {
    let plan_id = PlanId::from(plan_id_str);
    ctx.orchestrator.resume_plan(&plan_id)?;
    println!("Plan {plan_id} resumed.");
    Ok(())
}
