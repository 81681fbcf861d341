//! Per-worker liveness tracking and a companion circuit breaker
//! for tool invocations.
//!
//! `HealthMonitor` watches activity events (`tool_call`, `success`,
//! `error`) and derives three failure signals: a consecutive-error
//! threshold, a same-tool-repeated loop detector, and a ticker-driven
//! idle timeout. `CircuitBreaker` is a separate, optional wrapper a
//! caller places around an individual tool invocation; it is not wired
//! to `HealthMonitor` automatically, matching the source's split between
//! "is this worker healthy" and "should this particular call run".

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use conclave_store::models::WorkerId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

const LOOP_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub error_threshold: usize,
    pub idle_timeout: Duration,
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            idle_timeout: Duration::from_secs(300),
            check_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhealthyReason {
    HighErrorRate,
    Looping,
}

#[derive(Debug, Clone)]
pub enum HealthEvent {
    WorkerUnhealthy {
        worker_id: WorkerId,
        reason: UnhealthyReason,
    },
    WorkerIdle {
        worker_id: WorkerId,
    },
}

struct WorkerHealth {
    last_activity_at: Instant,
    recent_tool_calls: VecDeque<String>,
    consecutive_failures: usize,
    is_idle: bool,
    executing: bool,
}

impl WorkerHealth {
    fn new() -> Self {
        Self {
            last_activity_at: Instant::now(),
            recent_tool_calls: VecDeque::with_capacity(LOOP_WINDOW),
            consecutive_failures: 0,
            is_idle: false,
            executing: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity_at = Instant::now();
        self.is_idle = false;
    }
}

/// Tracks per-worker activity and emits [`HealthEvent`]s on an unbounded
/// channel. The idle ticker is spawned separately via
/// [`HealthMonitor::spawn_idle_ticker`] so tests can drive it manually
/// instead of waiting on real time.
pub struct HealthMonitor {
    config: HealthConfig,
    workers: Mutex<HashMap<WorkerId, WorkerHealth>>,
    events: mpsc::UnboundedSender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<HealthEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            std::sync::Arc::new(Self {
                config,
                workers: Mutex::new(HashMap::new()),
                events: tx,
            }),
            rx,
        )
    }

    fn entry<'a>(workers: &'a mut HashMap<WorkerId, WorkerHealth>, worker_id: &WorkerId) -> &'a mut WorkerHealth {
        workers.entry(worker_id.clone()).or_insert_with(WorkerHealth::new)
    }

    pub fn execution_start(&self, worker_id: &WorkerId) {
        let mut workers = self.workers.lock().unwrap();
        Self::entry(&mut workers, worker_id).executing = true;
    }

    pub fn execution_end(&self, worker_id: &WorkerId) {
        let mut workers = self.workers.lock().unwrap();
        let w = Self::entry(&mut workers, worker_id);
        w.executing = false;
        w.touch();
    }

    pub fn tool_call(&self, worker_id: &WorkerId, tool_name: &str) {
        let looping = {
            let mut workers = self.workers.lock().unwrap();
            let w = Self::entry(&mut workers, worker_id);
            w.touch();
            if w.recent_tool_calls.len() == LOOP_WINDOW {
                w.recent_tool_calls.pop_front();
            }
            w.recent_tool_calls.push_back(tool_name.to_string());
            w.recent_tool_calls.len() == LOOP_WINDOW
                && w.recent_tool_calls.iter().all(|n| n == tool_name)
        };
        if looping {
            let _ = self.events.send(HealthEvent::WorkerUnhealthy {
                worker_id: worker_id.clone(),
                reason: UnhealthyReason::Looping,
            });
        }
    }

    pub fn success(&self, worker_id: &WorkerId) {
        let mut workers = self.workers.lock().unwrap();
        let w = Self::entry(&mut workers, worker_id);
        w.touch();
        w.consecutive_failures = 0;
    }

    pub fn error(&self, worker_id: &WorkerId) {
        let unhealthy = {
            let mut workers = self.workers.lock().unwrap();
            let w = Self::entry(&mut workers, worker_id);
            w.touch();
            w.consecutive_failures += 1;
            w.consecutive_failures >= self.config.error_threshold
        };
        if unhealthy {
            let _ = self.events.send(HealthEvent::WorkerUnhealthy {
                worker_id: worker_id.clone(),
                reason: UnhealthyReason::HighErrorRate,
            });
        }
    }

    pub fn is_idle(&self, worker_id: &WorkerId) -> bool {
        self.workers
            .lock()
            .unwrap()
            .get(worker_id)
            .map(|w| w.is_idle)
            .unwrap_or(false)
    }

    /// Run one idle-check sweep: any non-executing worker whose last
    /// activity is older than the configured timeout is flagged idle
    /// (once; repeated sweeps do not re-fire until new activity clears
    /// the flag).
    pub fn check_idle_once(&self) {
        let now = Instant::now();
        let mut newly_idle = Vec::new();
        {
            let mut workers = self.workers.lock().unwrap();
            for (worker_id, w) in workers.iter_mut() {
                if w.executing || w.is_idle {
                    continue;
                }
                if now.duration_since(w.last_activity_at) >= self.config.idle_timeout {
                    w.is_idle = true;
                    newly_idle.push(worker_id.clone());
                }
            }
        }
        for worker_id in newly_idle {
            let _ = self.events.send(HealthEvent::WorkerIdle { worker_id });
        }
    }

    pub fn spawn_idle_ticker(self: &std::sync::Arc<Self>) -> JoinHandle<()> {
        let monitor = std::sync::Arc::clone(self);
        let mut ticker = interval(monitor.config.check_interval);
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                debug!("running idle check sweep");
                monitor.check_idle_once();
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Per-worker circuit breaker, wrapping an arbitrary tool invocation.
/// Not thread-shared by design -- one instance per worker, owned by
/// whatever drives that worker's tool calls.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

struct CircuitState {
    kind: BreakerState,
    failures: usize,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState {
                kind: BreakerState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call should be allowed right now. Transitions
    /// open -> half-open once the cooldown has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.kind {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.cooldown {
                    state.kind = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.kind = BreakerState::Closed;
        state.failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match state.kind {
            BreakerState::HalfOpen => {
                state.kind = BreakerState::Open;
                state.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                state.failures += 1;
                if state.failures >= self.config.failure_threshold {
                    state.kind = BreakerState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {
                state.opened_at = Some(Instant::now());
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().kind == BreakerState::Open
    }
}
