use crate::models::{PlanId, Task, TaskId, TaskState, TransitionRecord};
use crate::store::Store;

/// Allocate the next `task-N` id and bump the counter.
pub fn next_task_id(store: &Store) -> TaskId {
    store.with_state(|s| {
        let id = TaskId(format!("task-{}", s.next_task_id));
        s.next_task_id += 1;
        id
    })
}

pub fn insert_task(store: &Store, task: Task) {
    store.with_state(|s| s.tasks.push(task));
}

pub fn get_task(store: &Store, id: &TaskId) -> Option<Task> {
    store.read_state(|s| s.tasks.iter().find(|t| &t.id == id).cloned())
}

pub fn list_tasks(store: &Store) -> Vec<Task> {
    store.read_state(|s| s.tasks.clone())
}

pub fn list_tasks_for_plan(store: &Store, plan_id: &PlanId) -> Vec<Task> {
    store.read_state(|s| {
        s.tasks
            .iter()
            .filter(|t| t.plan_id.as_ref() == Some(plan_id))
            .cloned()
            .collect()
    })
}

pub fn update_task(store: &Store, id: &TaskId, f: impl FnOnce(&mut Task)) -> bool {
    store.with_state(|s| {
        if let Some(task) = s.tasks.iter_mut().find(|t| &t.id == id) {
            f(task);
            true
        } else {
            false
        }
    })
}

/// Apply an already-validated transition: set the new state and append a
/// history record. Validation itself is `conclave_core::state`'s job;
/// this function only records the outcome.
pub fn record_transition(store: &Store, id: &TaskId, record: TransitionRecord) -> bool {
    store.with_state(|s| {
        if let Some(task) = s.tasks.iter_mut().find(|t| &t.id == id) {
            task.state = record.to;
            task.history.push(record);
            true
        } else {
            false
        }
    })
}

/// Tasks whose state is `pending` and every dependency is `completed`.
pub fn ready_tasks(store: &Store, plan_id: &PlanId) -> Vec<Task> {
    store.read_state(|s| {
        let completed: std::collections::HashSet<&TaskId> = s
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Completed)
            .map(|t| &t.id)
            .collect();
        s.tasks
            .iter()
            .filter(|t| t.plan_id.as_ref() == Some(plan_id))
            .filter(|t| t.state == TaskState::Pending)
            .filter(|t| t.dependencies.iter().all(|d| completed.contains(d)))
            .cloned()
            .collect()
    })
}

/// True iff every non-cancelled task in the plan is terminal.
pub fn is_plan_complete(store: &Store, plan_id: &PlanId) -> bool {
    store.read_state(|s| {
        s.tasks
            .iter()
            .filter(|t| t.plan_id.as_ref() == Some(plan_id))
            .filter(|t| t.state != TaskState::Cancelled)
            .all(|t| t.state.is_terminal())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::StorePaths;
    use crate::models::Priority;
    use tempfile::tempdir;

    fn store() -> std::sync::Arc<Store> {
        let dir = tempdir().unwrap();
        Store::open(StorePaths::new(dir.path())).unwrap()
    }

    fn blank_task(id: TaskId, plan_id: &PlanId, deps: Vec<TaskId>) -> Task {
        Task {
            id,
            name: "t".into(),
            description: String::new(),
            priority: Priority::Normal,
            dependencies: deps,
            plan_id: Some(plan_id.clone()),
            base_branch: None,
            model_id: None,
            agent_type: None,
            target_files: vec![],
            state: TaskState::Pending,
            error_message: None,
            parent_worker_id: None,
            history: vec![],
        }
    }

    #[test]
    fn ready_tasks_respects_dependencies() {
        let store = store();
        let plan_id = PlanId("plan-1".into());
        let t1 = TaskId("task-1".into());
        let t2 = TaskId("task-2".into());
        let t3 = TaskId("task-3".into());

        insert_task(&store, blank_task(t1.clone(), &plan_id, vec![]));
        insert_task(&store, blank_task(t2.clone(), &plan_id, vec![t1.clone()]));
        insert_task(&store, blank_task(t3.clone(), &plan_id, vec![t1.clone()]));

        let ready: Vec<TaskId> = ready_tasks(&store, &plan_id).into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![t1.clone()]);

        update_task(&store, &t1, |t| t.state = TaskState::Completed);
        let mut ready: Vec<TaskId> = ready_tasks(&store, &plan_id).into_iter().map(|t| t.id).collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(ready, vec![t2, t3]);
    }

    #[test]
    fn is_plan_complete_ignores_cancelled() {
        let store = store();
        let plan_id = PlanId("plan-1".into());
        let t1 = TaskId("task-1".into());
        insert_task(&store, blank_task(t1.clone(), &plan_id, vec![]));
        assert!(!is_plan_complete(&store, &plan_id));
        update_task(&store, &t1, |t| t.state = TaskState::Cancelled);
        assert!(is_plan_complete(&store, &plan_id));
    }
}
