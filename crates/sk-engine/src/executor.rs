//! Note Executor
//!
//! Bounded pool that runs actuator calls so simultaneous notes neither
//! serialize behind each other nor spawn a thread per note. Submission is
//! fire-and-forget: the dispatcher never waits for an action to finish.
//!
//! Every action runs behind a panic guard. A failing actuator costs one note,
//! never the pool or the session.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::actuator::NoteActuator;
use crate::error::{EngineError, EngineResult};

/// One action to perform, with enough context to diagnose a missed note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteTask {
    /// Sheet key the action was resolved from
    pub key: String,
    /// Mapped action handed to the actuator
    pub action: String,
    /// Scheduled event time (ms)
    pub time: u64,
}

/// Executor counters
#[derive(Debug, Default)]
pub struct ExecutorStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// Point-in-time copy of [`ExecutorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Bounded thread pool bound to one actuator
pub struct NoteExecutor {
    pool: RwLock<Option<rayon::ThreadPool>>,
    actuator: Arc<dyn NoteActuator>,
    stats: Arc<ExecutorStats>,
    workers: usize,
}

impl NoteExecutor {
    /// Build a pool of `workers` threads (at least one)
    pub fn new(actuator: Arc<dyn NoteActuator>, workers: usize) -> EngineResult<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sk-note-{i}"))
            .panic_handler(|_| log::error!("[Executor] Note job panicked outside its guard"))
            .build()
            .map_err(|e| EngineError::ExecutorBuild(e.to_string()))?;

        log::debug!("[Executor] Started with {} threads", workers);

        Ok(Self {
            pool: RwLock::new(Some(pool)),
            actuator,
            stats: Arc::new(ExecutorStats::default()),
            workers,
        })
    }

    /// Queue an action; returns immediately
    pub fn submit(&self, task: NoteTask) -> EngineResult<()> {
        let pool = self.pool.read();
        let pool = pool.as_ref().ok_or(EngineError::ExecutorShutDown)?;

        let actuator = Arc::clone(&self.actuator);
        let stats = Arc::clone(&self.stats);
        stats.submitted.fetch_add(1, Ordering::Relaxed);

        pool.spawn(move || run_task(actuator.as_ref(), &task, &stats));
        Ok(())
    }

    /// Stop accepting work. Already queued actions still run; later
    /// submissions fail with [`EngineError::ExecutorShutDown`].
    pub fn shutdown(&self) {
        if self.pool.write().take().is_some() {
            log::debug!("[Executor] Shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.read().is_none()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn actuator(&self) -> &Arc<dyn NoteActuator> {
        &self.actuator
    }

    pub fn stats(&self) -> ExecutorStatsSnapshot {
        ExecutorStatsSnapshot {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

fn run_task(actuator: &dyn NoteActuator, task: &NoteTask, stats: &ExecutorStats) {
    match panic::catch_unwind(AssertUnwindSafe(|| actuator.perform(&task.action))) {
        Ok(Ok(())) => {
            stats.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "[Executor] Action '{}' (key {} @ {}ms) failed: {}",
                task.action,
                task.key,
                task.time,
                e
            );
        }
        Err(panic_info) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            let description = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            log::error!(
                "[Executor] Action '{}' (key {} @ {}ms) panicked: {}",
                task.action,
                task.key,
                task.time,
                description
            );
        }
    }
}
