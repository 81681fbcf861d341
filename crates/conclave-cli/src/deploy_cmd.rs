//! `conclave deploy` / `conclave deploy-all` -- turn ready tasks into
//! running workers.

use anyhow::Result;
use conclave_core::orchestrator::OrchestratorError;
use conclave_store::models::TaskId;

use crate::context::Context;

pub async fn run_deploy(ctx: &Context, task_id: &str) -> Result<()> {
    let worker = ctx.orchestrator.deploy(&TaskId::from(task_id)).await?;
    println!("Worker {} deployed for task {}.", worker.id, worker.task_ref);
    println!("  Branch:    {}", worker.branch_name);
    println!("  Worktree:  {}", worker.worktree_path.display());
    Ok(())
}

pub async fn run_deploy_all(ctx: &Context, plan_id: &str) -> Result<()> {
    let results = ctx.orchestrator.deploy_all(&plan_id.into()).await;
    if results.is_empty() {
        println!("No ready tasks to deploy in plan {plan_id}.");
        return Ok(());
    }

    let mut deployed = 0;
    let mut failed = 0;
    for result in results {
        match result {
            Ok(worker) => {
                deployed += 1;
                println!("Worker {} deployed for task {}.", worker.id, worker.task_ref);
            }
            Err(err) => {
                failed += 1;
                print_deploy_error(&err);
            }
        }
    }
    println!("{deployed} worker(s) deployed, {failed} failed.");
    Ok(())
}

fn print_deploy_error(err: &OrchestratorError) {
    eprintln!("  deploy failed: {err}");
}
