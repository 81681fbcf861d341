use crate::models::{Plan, PlanId};
use crate::store::Store;

/// Allocate the next `plan-N` id and bump the counter.
pub fn next_plan_id(store: &Store) -> PlanId {
    store.with_state(|s| {
        let id = PlanId(format!("plan-{}", s.next_plan_id));
        s.next_plan_id += 1;
        id
    })
}

pub fn insert_plan(store: &Store, plan: Plan) {
    store.with_state(|s| s.plans.push(plan));
}

pub fn get_plan(store: &Store, id: &PlanId) -> Option<Plan> {
    store.read_state(|s| s.plans.iter().find(|p| &p.id == id).cloned())
}

pub fn list_plans(store: &Store) -> Vec<Plan> {
    store.read_state(|s| s.plans.clone())
}

pub fn update_plan(store: &Store, id: &PlanId, f: impl FnOnce(&mut Plan)) -> bool {
    store.with_state(|s| {
        if let Some(plan) = s.plans.iter_mut().find(|p| &p.id == id) {
            f(plan);
            true
        } else {
            false
        }
    })
}

pub fn active_plan_id(store: &Store) -> Option<PlanId> {
    store.read_state(|s| s.active_plan_id.clone())
}

pub fn set_active_plan_id(store: &Store, id: Option<PlanId>) {
    store.with_state(|s| s.active_plan_id = id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanStatus;
    use crate::paths::StorePaths;
    use chrono::Utc;
    use tempfile::tempdir;

    fn store() -> std::sync::Arc<Store> {
        let dir = tempdir().unwrap();
        Store::open(StorePaths::new(dir.path())).unwrap()
    }

    #[test]
    fn next_plan_id_increments() {
        let store = store();
        assert_eq!(next_plan_id(&store).0, "plan-1");
        assert_eq!(next_plan_id(&store).0, "plan-2");
    }

    #[test]
    fn insert_and_get_plan() {
        let store = store();
        let id = next_plan_id(&store);
        insert_plan(
            &store,
            Plan {
                id: id.clone(),
                name: "demo".into(),
                description: String::new(),
                created_at: Utc::now(),
                base_branch: None,
                status: PlanStatus::Draft,
            },
        );
        let found = get_plan(&store, &id).unwrap();
        assert_eq!(found.name, "demo");
    }

    #[test]
    fn update_plan_mutates_in_place() {
        let store = store();
        let id = next_plan_id(&store);
        insert_plan(
            &store,
            Plan {
                id: id.clone(),
                name: "demo".into(),
                description: String::new(),
                created_at: Utc::now(),
                base_branch: None,
                status: PlanStatus::Draft,
            },
        );
        assert!(update_plan(&store, &id, |p| p.status = PlanStatus::Active));
        assert_eq!(get_plan(&store, &id).unwrap().status, PlanStatus::Active);
    }
}
