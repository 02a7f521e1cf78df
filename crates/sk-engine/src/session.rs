//! Playback Session
//!
//! One score bound to one transport clock. Owns the event queue, the note
//! executor and at most one live worker, and implements the lifecycle:
//!
//! ```text
//!   Idle ──play──▶ Running ⇄ Paused
//!                     │
//!          ┌──────────┴──────────┐
//!          ▼ queue drained       ▼ stop()
//!       Finished              Stopped
//!          └──continue_play / seek──▶ new run
//! ```
//!
//! `play`, `pause`, `seek`, `continue_play` and `stop` are serialized by one
//! control lock. A seek swaps the worker: the old one is retired and joined before
//! the new events are loaded, so only the fresh worker can see them.

use std::sync::Arc;

use parking_lot::Mutex;
use sk_core::{KeyMapping, PlaybackConfig, Score};

use crate::actuator::NoteActuator;
use crate::error::{EngineError, EngineResult};
use crate::executor::NoteExecutor;
use crate::queue::EventQueue;
use crate::transport::TransportClock;
use crate::worker::{
    PlaybackControl, SessionCallback, SessionCallbacks, SessionState, StateCell, StopReason,
    WorkerContext, WorkerHandle,
};

/// Actuator and mapping captured by the last `play()`
struct Binding {
    actuator: Arc<dyn NoteActuator>,
    mapping: Arc<KeyMapping>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for [`PlaybackSession`]
pub struct SessionBuilder {
    score: Arc<Score>,
    clock: Arc<TransportClock>,
    config: PlaybackConfig,
    on_finished: Option<SessionCallback>,
    on_terminated: Option<SessionCallback>,
}

impl SessionBuilder {
    /// Out-of-range fields are clamped when the session is built
    pub fn config(mut self, config: PlaybackConfig) -> Self {
        self.config = config;
        self
    }

    /// Called once when the queue drains naturally
    pub fn on_finished(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_finished = Some(Box::new(callback));
        self
    }

    /// Called once when an active run is stopped
    pub fn on_terminated(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_terminated = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> PlaybackSession {
        PlaybackSession {
            score: self.score,
            clock: self.clock,
            config: self.config.sanitized(),
            queue: Arc::new(EventQueue::new()),
            control: Arc::new(PlaybackControl::new()),
            callbacks: Arc::new(SessionCallbacks::new(self.on_finished, self.on_terminated)),
            state: Arc::new(StateCell::new()),
            control_lock: Mutex::new(()),
            worker: Mutex::new(None),
            binding: Mutex::new(None),
            executor: Mutex::new(None),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Plays one score through an actuator
pub struct PlaybackSession {
    score: Arc<Score>,
    clock: Arc<TransportClock>,
    config: PlaybackConfig,
    queue: Arc<EventQueue>,
    control: Arc<PlaybackControl>,
    callbacks: Arc<SessionCallbacks>,
    state: Arc<StateCell>,
    /// Serializes play/pause/seek/continue/stop
    control_lock: Mutex<()>,
    worker: Mutex<Option<WorkerHandle>>,
    binding: Mutex<Option<Binding>>,
    executor: Mutex<Option<Arc<NoteExecutor>>>,
}

impl PlaybackSession {
    pub fn builder(score: Arc<Score>, clock: Arc<TransportClock>) -> SessionBuilder {
        SessionBuilder {
            score,
            clock,
            config: PlaybackConfig::default(),
            on_finished: None,
            on_terminated: None,
        }
    }

    /// Start a fresh run from `start_time_ms` (or 0)
    ///
    /// Any previous run is retired silently; its callbacks will not fire.
    pub fn play(
        &self,
        actuator: Arc<dyn NoteActuator>,
        mapping: Arc<KeyMapping>,
        start_time_ms: Option<u64>,
    ) -> EngineResult<()> {
        let _guard = self.control_lock.lock();
        let start = start_time_ms.unwrap_or(0);

        self.retire_worker();
        self.clock.set_playing(false);

        if let Some(old) = self.executor.lock().take() {
            old.shutdown();
        }
        let executor = Arc::new(NoteExecutor::new(
            Arc::clone(&actuator),
            self.config.max_workers,
        )?);
        *self.executor.lock() = Some(Arc::clone(&executor));
        *self.binding.lock() = Some(Binding {
            actuator,
            mapping: Arc::clone(&mapping),
        });

        let run = self.callbacks.begin_run();
        self.state.set(SessionState::Running);
        self.control.set_seeking(false);
        self.control.set_playing(true);

        self.clock.force_set_time(start);
        self.clock.set_duration(self.score.last_time());
        self.queue.load_all(self.score.events_from(start));

        log::info!(
            "[Session] Playing {} events from {}ms (last {}ms)",
            self.queue.len(),
            start,
            self.score.last_time()
        );

        if let Err(e) = self.spawn_worker(executor, mapping, run) {
            self.control.set_playing(false);
            self.state.set(SessionState::Stopped);
            return Err(e);
        }
        self.clock.set_playing(true);
        Ok(())
    }

    /// Freeze the clock; the worker stalls on its current event
    pub fn pause(&self) {
        let _guard = self.control_lock.lock();
        self.control.set_playing(false);
        self.clock.set_playing(false);
        if self
            .state
            .transition(&[SessionState::Running], SessionState::Paused)
        {
            log::debug!("[Session] Paused at {}ms", self.clock.current_time());
        }
    }

    /// Resume after a pause; a finished or stopped session rewinds to 0
    pub fn continue_play(&self) {
        let _guard = self.control_lock.lock();

        if self.binding.lock().is_none() {
            log::error!("[Session] continue_play called before play");
            return;
        }

        let state = self.state.get();
        if state.is_ended() {
            log::debug!("[Session] Rewinding {:?} session", state);
            if let Err(e) = self.seek_locked(0) {
                log::error!("[Session] Rewind failed: {}", e);
                return;
            }
        }

        self.control.set_playing(true);
        self.clock.set_playing(true);
        self.state.set(SessionState::Running);
    }

    /// End the current run; safe to call repeatedly and from callbacks
    pub fn stop(&self) {
        let _guard = self.control_lock.lock();
        self.stop_locked();
    }

    /// Jump to `position_ms`, keeping the playing/paused state
    pub fn seek(&self, position_ms: u64) -> EngineResult<()> {
        let _guard = self.control_lock.lock();
        self.seek_locked(position_ms)
    }

    /// Soft cleanup only marks the session not playing. Forced cleanup
    /// stops everything and releases the actuator and mapping.
    pub fn cleanup(&self, force: bool) {
        self.control.set_playing(false);
        if !force {
            return;
        }

        if let Some(binding) = self.release() {
            binding.actuator.cleanup();
        }
        log::debug!("[Session] Cleaned up");
    }

    /// Stop and drop the actuator and mapping without cleaning up the
    /// actuator. Use when the actuator outlives this session.
    pub fn detach(&self) {
        if self.release().is_some() {
            log::debug!("[Session] Detached from actuator");
        }
    }

    fn release(&self) -> Option<Binding> {
        let _guard = self.control_lock.lock();
        self.stop_locked();
        self.binding.lock().take()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn is_playing(&self) -> bool {
        self.control.is_playing()
    }

    pub fn is_finished(&self) -> bool {
        self.state.get().is_ended()
    }

    pub fn last_time(&self) -> u64 {
        self.score.last_time()
    }

    pub fn score(&self) -> &Arc<Score> {
        &self.score
    }

    pub fn clock(&self) -> &Arc<TransportClock> {
        &self.clock
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Events still waiting in the queue
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    // ─── internals (control lock held) ─────────────────────────────────────

    fn stop_locked(&self) {
        let previous = self.state.swap(SessionState::Stopped);
        self.control.set_playing(false);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel(StopReason::Terminate);
            self.queue.close();
            worker.stop(StopReason::Terminate, self.config.join_timeout());
        }

        self.queue.clear();
        self.clock.set_playing(false);
        if let Some(executor) = self.executor.lock().take() {
            executor.shutdown();
        }

        if previous.is_active() {
            log::info!("[Session] Stopped at {}ms", self.clock.current_time());
            self.callbacks.terminate(self.callbacks.current_run());
        } else if previous == SessionState::Idle {
            self.state.set(SessionState::Idle);
        }
    }

    fn seek_locked(&self, position_ms: u64) -> EngineResult<()> {
        let Some(mapping) = self.binding.lock().as_ref().map(|b| Arc::clone(&b.mapping)) else {
            self.clock.force_set_time(position_ms);
            return Ok(());
        };

        self.control.set_seeking(true);
        self.clock.set_playing(false);
        self.queue.clear();
        self.retire_worker();

        // After the retire: a worker finishing concurrently rewinds to 0.
        self.clock.force_set_time(position_ms);
        self.clock.set_duration(self.score.last_time());
        self.queue.load_all(self.score.events_from(position_ms));

        let run = if self.state.get().is_active() {
            self.callbacks.current_run()
        } else {
            self.state.set(SessionState::Paused);
            self.callbacks.begin_run()
        };

        let spawned = self
            .ensure_executor()
            .and_then(|executor| self.spawn_worker(executor, mapping, run));
        self.control.set_seeking(false);

        if let Err(e) = spawned {
            self.control.set_playing(false);
            self.state.set(SessionState::Stopped);
            return Err(e);
        }

        log::debug!(
            "[Session] Seeked to {}ms ({} events pending)",
            position_ms,
            self.queue.len()
        );

        // Read after the swap: a run that finished meanwhile stays paused
        if self.control.is_playing() {
            self.state.set(SessionState::Running);
            self.clock.set_playing(true);
        }
        Ok(())
    }

    fn retire_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop(StopReason::Retire, self.config.join_timeout());
        }
    }

    fn ensure_executor(&self) -> EngineResult<Arc<NoteExecutor>> {
        let mut slot = self.executor.lock();
        if let Some(executor) = slot.as_ref().filter(|e| !e.is_shut_down()) {
            return Ok(Arc::clone(executor));
        }

        let actuator = match self.binding.lock().as_ref() {
            Some(binding) => Arc::clone(&binding.actuator),
            None => return Err(EngineError::NoActiveSession),
        };
        let executor = Arc::new(NoteExecutor::new(actuator, self.config.max_workers)?);
        *slot = Some(Arc::clone(&executor));
        Ok(executor)
    }

    fn spawn_worker(
        &self,
        executor: Arc<NoteExecutor>,
        mapping: Arc<KeyMapping>,
        run: u64,
    ) -> EngineResult<()> {
        let handle = WorkerHandle::spawn(WorkerContext {
            clock: Arc::clone(&self.clock),
            queue: Arc::clone(&self.queue),
            executor,
            mapping,
            control: Arc::clone(&self.control),
            callbacks: Arc::clone(&self.callbacks),
            state: Arc::clone(&self.state),
            config: self.config.clone(),
            last_time: self.score.last_time(),
            run,
        })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop_locked();
    }
}
