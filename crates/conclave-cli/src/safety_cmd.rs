//! `conclave emergency-stop` -- the operator-facing kill switch.
//!
//! Reports the sub-tasks in scope via
//! [`conclave_core::safety::emergency_stop_targets`] before tearing
//! down the workers that own them -- at the operator CLI layer,
//! "stopping a sub-task" means killing the worker running it without
//! pushing its branch.

use anyhow::Result;
use conclave_core::safety::EmergencyScope;
use conclave_store::models::PlanId;
use conclave_store::queries::workers as workers_db;

use crate::context::Context;

pub fn run_emergency_stop(ctx: &Context, plan_id: Option<String>) -> Result<()> {
    let plan_id = plan_id.map(|id| PlanId::from(id.as_str()));
    let scope = if plan_id.is_some() { EmergencyScope::Plan } else { EmergencyScope::Global };
    let sub_task_targets = ctx.orchestrator.emergency_stop_targets(scope, None, plan_id.as_ref());
    if !sub_task_targets.is_empty() {
        println!("{} sub-task(s) in scope: {}", sub_task_targets.len(), sub_task_targets.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", "));
    }

    let workers = workers_db::list_workers(&ctx.store);
    let targets: Vec<_> = workers
        .into_iter()
        .filter(|w| plan_id.as_ref().is_none_or(|p| w.plan_id.as_ref() == Some(p)))
        .collect();

    if targets.is_empty() {
        println!("No workers in scope.");
        return Ok(());
    }

    let mut stopped = 0;
    for worker in &targets {
        match ctx.orchestrator.kill_worker(&worker.id, true, false) {
            Ok(()) => {
                stopped += 1;
                println!("Stopped worker {} (task {}).", worker.id, worker.task_ref);
            }
            Err(err) => eprintln!("failed to stop worker {}: {err}", worker.id),
        }
    }
    println!("{stopped}/{} worker(s) stopped.", targets.len());
    Ok(())
}
