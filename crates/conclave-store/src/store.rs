//! `Store` is the in-memory, JSON-file-backed equivalent of a database
//! connection pool: callers obtain one `Store` at startup and pass it
//! (usually as `&Store`) to the functions in `queries::*`, exactly the
//! way the teacher's command modules thread a `PgPool` through
//! `queries::tasks::*`. Unlike a real pool there is no network I/O to
//! await, so these accessors are plain synchronous functions behind a
//! `std::sync::Mutex` rather than `async fn` -- the asynchrony in this
//! system lives in the orchestrator's deploy loop and the `ModelRunner`
//! boundary, not in the data layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error};

use crate::paths::StorePaths;
use crate::persistence::{
    self, QueueFile, StateFile,
};

/// Guards both state files behind one lock each, with a dirty flag per
/// file so the debounced writer only touches files that actually
/// changed. State and the message queue are independent aggregates
/// with independent locks, mirroring the single orchestrator lock and
/// single `MessageBus` lock elsewhere in this system.
pub struct Store {
    paths: StorePaths,
    state: Mutex<StateFile>,
    state_dirty: AtomicBool,
    queue: Mutex<QueueFile>,
    queue_dirty: AtomicBool,
}

impl Store {
    /// Open (or initialize) the store at `paths`, restoring both state
    /// files from disk if present.
    pub fn open(paths: StorePaths) -> Result<Arc<Self>> {
        let state = persistence::load_state_file(&paths.state_file())?.unwrap_or_default();
        let queue = persistence::load_queue_file(&paths.queue_file())?;
        Ok(Arc::new(Self {
            paths,
            state: Mutex::new(state),
            state_dirty: AtomicBool::new(false),
            queue: Mutex::new(queue),
            queue_dirty: AtomicBool::new(false),
        }))
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut StateFile) -> R) -> R {
        let mut guard = self.state.lock().unwrap();
        let result = f(&mut guard);
        self.state_dirty.store(true, Ordering::Release);
        result
    }

    pub fn read_state<R>(&self, f: impl FnOnce(&StateFile) -> R) -> R {
        let guard = self.state.lock().unwrap();
        f(&guard)
    }

    pub fn with_queue<R>(&self, f: impl FnOnce(&mut QueueFile) -> R) -> R {
        let mut guard = self.queue.lock().unwrap();
        let result = f(&mut guard);
        self.queue_dirty.store(true, Ordering::Release);
        result
    }

    pub fn read_queue<R>(&self, f: impl FnOnce(&QueueFile) -> R) -> R {
        let guard = self.queue.lock().unwrap();
        f(&guard)
    }

    /// Write both files immediately, regardless of the dirty flags.
    pub fn save_now(&self) -> Result<()> {
        let state = self.state.lock().unwrap().clone();
        persistence::save_state_file(&self.paths.state_file(), &state)?;
        self.state_dirty.store(false, Ordering::Release);

        let queue = self.queue.lock().unwrap().clone();
        persistence::save_queue_file(&self.paths.queue_file(), &queue)?;
        self.queue_dirty.store(false, Ordering::Release);
        Ok(())
    }

    fn flush_if_dirty(&self) {
        if self.state_dirty.swap(false, Ordering::AcqRel) {
            let state = self.state.lock().unwrap().clone();
            if let Err(err) = persistence::save_state_file(&self.paths.state_file(), &state) {
                error!(%err, "failed to persist orchestrator state file");
                self.state_dirty.store(true, Ordering::Release);
            }
        }
        if self.queue_dirty.swap(false, Ordering::AcqRel) {
            let queue = self.queue.lock().unwrap().clone();
            if let Err(err) = persistence::save_queue_file(&self.paths.queue_file(), &queue) {
                error!(%err, "failed to persist message queue file");
                self.queue_dirty.store(true, Ordering::Release);
            }
        }
    }

    /// Spawn the debounced background writer: every `interval` it flushes
    /// whichever file(s) were mutated since the last tick. ~500ms in
    /// production use.
    pub fn spawn_debounced_writer(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                debug!("debounced persistence tick");
                store.flush_if_dirty();
            }
        })
    }
}
