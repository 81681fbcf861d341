//! Depth policy, rate limiting, total/parallel caps, ancestry cycle
//! detection, and cost accounting for sub-task admission.
//!
//! `SafetyLimits::check_admission` runs five predicates in a fixed
//! order -- Depth, Rate, Total, Parallel, Cycle -- and returns the first
//! failure as a distinct, context-rich error variant.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use conclave_store::models::{PlanId, SpawnContext, SubTaskId, WorkerId};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// All limits are overridable; defaults are conservative fleet-safe
/// values tuned for a single-orchestrator-plus-agents fleet.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub max_depth_orchestrator: u8,
    pub max_depth_agent: u8,
    pub max_sub_tasks_per_worker: usize,
    pub max_parallel_sub_tasks: usize,
    pub spawns_per_minute: usize,
    pub max_cost_per_worker: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_depth_orchestrator: 2,
            max_depth_agent: 1,
            max_sub_tasks_per_worker: 20,
            max_parallel_sub_tasks: 4,
            spawns_per_minute: 10,
            max_cost_per_worker: 50_000_000,
        }
    }
}

impl SafetyConfig {
    pub fn max_depth(&self, ctx: SpawnContext) -> u8 {
        match ctx {
            SpawnContext::Orchestrator => self.max_depth_orchestrator,
            SpawnContext::Agent => self.max_depth_agent,
        }
    }
}

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error(
        "depth limit exceeded for spawnContext={context}: current depth {current}, max {max} \
         (hint: spawn via 'orchestrator' context to reach depth {max_orchestrator}, or stop recursing here)"
    )]
    DepthLimitExceeded {
        context: SpawnContext,
        current: u8,
        max: u8,
        max_orchestrator: u8,
    },

    #[error(
        "rate limit exceeded for worker {worker_id}: {window} spawns in the last 60s, limit {limit} \
         (hint: wait before spawning another sub-task)"
    )]
    RateLimitExceeded {
        worker_id: WorkerId,
        window: usize,
        limit: usize,
    },

    #[error(
        "total sub-task limit exceeded for worker {worker_id}: {count} sub-tasks created, limit {limit} \
         (hint: raise maxSubTasksPerWorker or complete existing sub-tasks first)"
    )]
    TotalLimitExceeded {
        worker_id: WorkerId,
        count: usize,
        limit: usize,
    },

    #[error(
        "parallel sub-task limit exceeded for worker {worker_id}: {running} running, limit {limit} \
         (hint: wait for a running sub-task to complete)"
    )]
    ParallelLimitExceeded {
        worker_id: WorkerId,
        running: usize,
        limit: usize,
    },

    #[error(
        "cycle detected: agentType={agent_type} with an identical prompt already appears in this \
         sub-task's ancestry (promptHash={prompt_hash}) \
         (hint: vary the prompt or delegate to a different agent type)"
    )]
    CycleDetected {
        agent_type: String,
        prompt_hash: String,
    },
}

/// One link in an ancestry chain, recorded on successful admission and
/// removed on terminalization.
#[derive(Debug, Clone)]
pub struct AncestryLink {
    pub sub_task_id: SubTaskId,
    pub parent_sub_task_id: Option<SubTaskId>,
    pub worker_id: WorkerId,
    pub agent_type: String,
    pub prompt_hash: String,
}

/// Normalize a prompt before hashing: trim, collapse internal whitespace,
/// and lowercase, so trivially-reformatted duplicate prompts still
/// collide for cycle detection.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn hash_prompt(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_prompt(prompt).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyScope {
    SubTask(u64),
    Worker,
    Plan,
    Global,
}

/// Per-worker counters and the global ancestry store, all behind one
/// lock alongside the cost-accounting totals.
#[derive(Default)]
struct LimitState {
    spawn_timestamps: HashMap<WorkerId, Vec<Instant>>,
    sub_tasks_created: HashMap<WorkerId, usize>,
    running: HashMap<WorkerId, usize>,
    ancestry: HashMap<SubTaskId, AncestryLink>,
    cost_per_worker: HashMap<WorkerId, u64>,
    cost_global: u64,
}

pub struct SafetyLimits {
    config: SafetyConfig,
    state: Mutex<LimitState>,
}

impl SafetyLimits {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimitState::default()),
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Run the five admission predicates in fixed order. `ancestry_chain`
    /// is the chain from the new sub-task's immediate parent up to the
    /// root; oldest-last ordering is not required -- only membership is
    /// checked.
    #[allow(clippy::too_many_arguments)]
    pub fn check_admission(
        &self,
        worker_id: &WorkerId,
        parent_depth: u8,
        spawn_context: SpawnContext,
        agent_type: &str,
        prompt: &str,
        ancestry_chain: &[AncestryLink],
    ) -> Result<(), SafetyError> {
        // 1. Depth
        let max = self.config.max_depth(spawn_context);
        if parent_depth >= max {
            return Err(SafetyError::DepthLimitExceeded {
                context: spawn_context,
                current: parent_depth,
                max,
                max_orchestrator: self.config.max_depth_orchestrator,
            });
        }

        let mut state = self.state.lock().unwrap();

        // 2. Rate: sliding 60s window of spawn timestamps.
        let now = Instant::now();
        let timestamps = state.spawn_timestamps.entry(worker_id.clone()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        if timestamps.len() >= self.config.spawns_per_minute {
            return Err(SafetyError::RateLimitExceeded {
                worker_id: worker_id.clone(),
                window: timestamps.len(),
                limit: self.config.spawns_per_minute,
            });
        }

        // 3. Total: every sub-task ever created for this worker, any
        // terminal state counted.
        let created = *state.sub_tasks_created.get(worker_id).unwrap_or(&0);
        if created >= self.config.max_sub_tasks_per_worker {
            return Err(SafetyError::TotalLimitExceeded {
                worker_id: worker_id.clone(),
                count: created,
                limit: self.config.max_sub_tasks_per_worker,
            });
        }

        // 4. Parallel: currently-running sub-tasks for this worker.
        let running = *state.running.get(worker_id).unwrap_or(&0);
        if running >= self.config.max_parallel_sub_tasks {
            return Err(SafetyError::ParallelLimitExceeded {
                worker_id: worker_id.clone(),
                running,
                limit: self.config.max_parallel_sub_tasks,
            });
        }

        // 5. Cycle: no earlier ancestry entry may share (agentType, promptHash).
        let prompt_hash = hash_prompt(prompt);
        if ancestry_chain
            .iter()
            .any(|entry| entry.agent_type == agent_type && entry.prompt_hash == prompt_hash)
        {
            return Err(SafetyError::CycleDetected {
                agent_type: agent_type.to_string(),
                prompt_hash,
            });
        }

        // Record the successful spawn timestamp now so a burst of
        // concurrent admissions is rate-limited correctly.
        timestamps.push(now);
        Ok(())
    }

    /// Record ancestry + counters on successful `createSubTask`.
    pub fn record_spawn(&self, worker_id: &WorkerId, link: AncestryLink) {
        let mut state = self.state.lock().unwrap();
        state.ancestry.insert(link.sub_task_id.clone(), link);
        *state.sub_tasks_created.entry(worker_id.clone()).or_insert(0) += 1;
        *state.running.entry(worker_id.clone()).or_insert(0) += 1;
    }

    /// Build the ancestry chain for a sub-task whose parent is
    /// `parent_sub_task_id`, walking up to the root.
    pub fn ancestry_chain_for(&self, parent_sub_task_id: Option<&SubTaskId>) -> Vec<AncestryLink> {
        let state = self.state.lock().unwrap();
        let mut chain = Vec::new();
        let mut cursor = parent_sub_task_id.cloned();
        while let Some(id) = cursor {
            let Some(link) = state.ancestry.get(&id) else {
                break;
            };
            chain.push(link.clone());
            cursor = link.parent_sub_task_id.clone();
        }
        chain
    }

    /// Remove ancestry on sub-task terminalization and decrement the
    /// running counter.
    pub fn terminalize(&self, worker_id: &WorkerId, sub_task_id: &SubTaskId) {
        let mut state = self.state.lock().unwrap();
        state.ancestry.remove(sub_task_id);
        if let Some(count) = state.running.get_mut(worker_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Clear all per-worker state (rate window, counters, ancestry
    /// entries owned by this worker) on a worker reset.
    pub fn reset_worker(&self, worker_id: &WorkerId) {
        let mut state = self.state.lock().unwrap();
        state.spawn_timestamps.remove(worker_id);
        state.sub_tasks_created.remove(worker_id);
        state.running.remove(worker_id);
        state.ancestry.retain(|_, link| &link.worker_id != worker_id);
        state.cost_per_worker.remove(worker_id);
    }

    pub fn record_cost(&self, worker_id: &WorkerId, usage: TokenUsage) {
        let mut state = self.state.lock().unwrap();
        *state.cost_per_worker.entry(worker_id.clone()).or_insert(0) += usage.total();
        state.cost_global += usage.total();
    }

    pub fn cost_for_worker(&self, worker_id: &WorkerId) -> u64 {
        *self.state.lock().unwrap().cost_per_worker.get(worker_id).unwrap_or(&0)
    }

    pub fn global_cost(&self) -> u64 {
        self.state.lock().unwrap().cost_global
    }

    pub fn is_over_budget(&self, worker_id: &WorkerId) -> bool {
        self.cost_for_worker(worker_id) >= self.config.max_cost_per_worker
    }
}

/// The set of sub-task ids an `emergencyStop(scope)` call should cancel,
/// computed from the ancestry store. Actually cancelling them is
/// `SubTaskManager`'s job; this just identifies the targets.
pub fn emergency_stop_targets(
    limits: &SafetyLimits,
    scope: EmergencyScope,
    worker_id: Option<&WorkerId>,
    plan_id: Option<&PlanId>,
    plan_of: impl Fn(&WorkerId) -> Option<PlanId>,
) -> Vec<SubTaskId> {
    let state = limits.state.lock().unwrap();
    match scope {
        EmergencyScope::Global => state.ancestry.keys().cloned().collect(),
        EmergencyScope::Worker => {
            let Some(worker_id) = worker_id else { return Vec::new() };
            state
                .ancestry
                .values()
                .filter(|l| &l.worker_id == worker_id)
                .map(|l| l.sub_task_id.clone())
                .collect()
        }
        EmergencyScope::Plan => {
            let Some(plan_id) = plan_id else { return Vec::new() };
            state
                .ancestry
                .values()
                .filter(|l| plan_of(&l.worker_id).as_ref() == Some(plan_id))
                .map(|l| l.sub_task_id.clone())
                .collect()
        }
        EmergencyScope::SubTask(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str) -> WorkerId {
        WorkerId(name.to_string())
    }

    /// Agent context allows depth 0->1, rejects 1->2; orchestrator
    /// context allows 1->2, rejects 2->3.
    #[test]
    fn depth_limits_per_spawn_context() {
        let limits = SafetyLimits::new(SafetyConfig::default());
        let w = worker("w1");

        assert!(limits
            .check_admission(&w, 0, SpawnContext::Agent, "@a", "p", &[])
            .is_ok());
        let err = limits
            .check_admission(&w, 1, SpawnContext::Agent, "@a", "p", &[])
            .unwrap_err();
        match err {
            SafetyError::DepthLimitExceeded { context, current, max, .. } => {
                assert_eq!(context, SpawnContext::Agent);
                assert_eq!(current, 1);
                assert_eq!(max, 1);
            }
            other => panic!("expected DepthLimitExceeded, got {other:?}"),
        }

        assert!(limits
            .check_admission(&w, 1, SpawnContext::Orchestrator, "@a", "p", &[])
            .is_ok());
        assert!(limits
            .check_admission(&w, 2, SpawnContext::Orchestrator, "@a", "p", &[])
            .is_err());
    }

    /// Identical (agentType, prompt) in the ancestry chain is a cycle;
    /// a different agent type with the same prompt is allowed.
    #[test]
    fn cycle_detection() {
        let limits = SafetyLimits::new(SafetyConfig::default());
        let w = worker("w1");
        let chain = vec![AncestryLink {
            sub_task_id: SubTaskId("root".into()),
            parent_sub_task_id: None,
            worker_id: w.clone(),
            agent_type: "@architect".to_string(),
            prompt_hash: hash_prompt("Refactor X"),
        }];

        let err = limits
            .check_admission(&w, 0, SpawnContext::Agent, "@architect", "Refactor X", &chain)
            .unwrap_err();
        assert!(matches!(err, SafetyError::CycleDetected { .. }));

        assert!(limits
            .check_admission(&w, 0, SpawnContext::Agent, "@reviewer", "Refactor X", &chain)
            .is_ok());
    }

    #[test]
    fn total_and_parallel_limits_enforced() {
        let mut config = SafetyConfig::default();
        config.max_sub_tasks_per_worker = 1;
        config.max_parallel_sub_tasks = 1;
        let limits = SafetyLimits::new(config);
        let w = worker("w1");

        limits
            .check_admission(&w, 0, SpawnContext::Agent, "@a", "one", &[])
            .unwrap();
        limits.record_spawn(
            &w,
            AncestryLink {
                sub_task_id: SubTaskId("s1".into()),
                parent_sub_task_id: None,
                worker_id: w.clone(),
                agent_type: "@a".into(),
                prompt_hash: hash_prompt("one"),
            },
        );

        let err = limits
            .check_admission(&w, 0, SpawnContext::Agent, "@a", "two", &[])
            .unwrap_err();
        assert!(matches!(err, SafetyError::TotalLimitExceeded { .. }));
    }

    #[test]
    fn rate_limit_enforced() {
        let mut config = SafetyConfig::default();
        config.spawns_per_minute = 2;
        config.max_sub_tasks_per_worker = 100;
        config.max_parallel_sub_tasks = 100;
        let limits = SafetyLimits::new(config);
        let w = worker("w1");

        limits.check_admission(&w, 0, SpawnContext::Agent, "@a", "p1", &[]).unwrap();
        limits.check_admission(&w, 0, SpawnContext::Agent, "@a", "p2", &[]).unwrap();
        let err = limits
            .check_admission(&w, 0, SpawnContext::Agent, "@a", "p3", &[])
            .unwrap_err();
        assert!(matches!(err, SafetyError::RateLimitExceeded { .. }));
    }

    #[test]
    fn ancestry_chain_walks_to_root() {
        let limits = SafetyLimits::new(SafetyConfig::default());
        let w = worker("w1");
        limits.record_spawn(
            &w,
            AncestryLink {
                sub_task_id: SubTaskId("root".into()),
                parent_sub_task_id: None,
                worker_id: w.clone(),
                agent_type: "@a".into(),
                prompt_hash: "h1".into(),
            },
        );
        limits.record_spawn(
            &w,
            AncestryLink {
                sub_task_id: SubTaskId("child".into()),
                parent_sub_task_id: Some(SubTaskId("root".into())),
                worker_id: w.clone(),
                agent_type: "@b".into(),
                prompt_hash: "h2".into(),
            },
        );

        let chain = limits.ancestry_chain_for(Some(&SubTaskId("child".into())));
        let ids: Vec<String> = chain.iter().map(|l| l.sub_task_id.0.clone()).collect();
        assert_eq!(ids, vec!["child", "root"]);
    }

    #[test]
    fn terminalize_removes_ancestry_and_frees_parallel_slot() {
        let mut config = SafetyConfig::default();
        config.max_parallel_sub_tasks = 1;
        let limits = SafetyLimits::new(config);
        let w = worker("w1");
        let link = AncestryLink {
            sub_task_id: SubTaskId("s1".into()),
            parent_sub_task_id: None,
            worker_id: w.clone(),
            agent_type: "@a".into(),
            prompt_hash: "h".into(),
        };
        limits.record_spawn(&w, link.clone());
        assert!(limits
            .check_admission(&w, 0, SpawnContext::Agent, "@a", "other", &[])
            .is_err());
        limits.terminalize(&w, &link.sub_task_id);
        assert!(limits
            .check_admission(&w, 0, SpawnContext::Agent, "@a", "other", &[])
            .is_ok());
    }

    #[test]
    fn normalize_prompt_collapses_whitespace_and_case() {
        assert_eq!(normalize_prompt("  Refactor   X  "), "refactor x");
        assert_eq!(hash_prompt("Refactor X"), hash_prompt("  refactor  x "));
    }
}
