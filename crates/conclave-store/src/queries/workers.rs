use crate::models::{Worker, WorkerId};
use crate::store::Store;

pub fn upsert_worker(store: &Store, worker: Worker) {
    store.with_state(|s| {
        if let Some(existing) = s.workers.iter_mut().find(|w| w.id == worker.id) {
            *existing = worker;
        } else {
            s.workers.push(worker);
        }
    });
}

pub fn get_worker(store: &Store, id: &WorkerId) -> Option<Worker> {
    store.read_state(|s| s.workers.iter().find(|w| &w.id == id).cloned())
}

pub fn list_workers(store: &Store) -> Vec<Worker> {
    store.read_state(|s| s.workers.clone())
}

pub fn update_worker(store: &Store, id: &WorkerId, f: impl FnOnce(&mut Worker)) -> bool {
    store.with_state(|s| {
        if let Some(worker) = s.workers.iter_mut().find(|w| &w.id == id) {
            f(worker);
            true
        } else {
            false
        }
    })
}

pub fn remove_worker(store: &Store, id: &WorkerId) -> bool {
    store.with_state(|s| {
        let before = s.workers.len();
        s.workers.retain(|w| &w.id != id);
        s.workers.len() != before
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_worker_id, PlanId, TaskId, WorkerStatus};
    use crate::paths::StorePaths;
    use chrono::Utc;
    use tempfile::tempdir;

    fn store() -> std::sync::Arc<Store> {
        let dir = tempdir().unwrap();
        Store::open(StorePaths::new(dir.path())).unwrap()
    }

    fn sample_worker() -> Worker {
        let now = Utc::now();
        Worker {
            id: new_worker_id(),
            name: "task-1".into(),
            task_ref: TaskId("task-1".into()),
            worktree_path: "/tmp/wt".into(),
            branch_name: "task-1".into(),
            base_branch: "main".into(),
            created_at: now,
            last_activity_at: now,
            status: WorkerStatus::Running,
            messages: vec![],
            pending_approvals: vec![],
            parent_worker_id: None,
            plan_id: Some(PlanId("plan-1".into())),
            depth: 0,
        }
    }

    #[test]
    fn upsert_then_get_and_update() {
        let store = store();
        let worker = sample_worker();
        let id = worker.id.clone();
        upsert_worker(&store, worker);
        assert_eq!(get_worker(&store, &id).unwrap().status, WorkerStatus::Running);

        assert!(update_worker(&store, &id, |w| w.status = WorkerStatus::Idle));
        assert_eq!(get_worker(&store, &id).unwrap().status, WorkerStatus::Idle);
    }

    #[test]
    fn remove_worker_drops_entry() {
        let store = store();
        let worker = sample_worker();
        let id = worker.id.clone();
        upsert_worker(&store, worker);
        assert!(remove_worker(&store, &id));
        assert!(get_worker(&store, &id).is_none());
        assert!(!remove_worker(&store, &id));
    }
}
