//! Playback Worker
//!
//! Drains the event queue in time order, waits for each event's due time in
//! short slices and hands the mapped actions to the note executor.
//!
//! ```text
//!   EventQueue ──get(poll)──▶ "sk-playback" ──submit──▶ NoteExecutor ──▶ NoteActuator
//!                                  │
//!                                  ├─ set_current_time ──▶ TransportClock
//!                                  └─ finish/terminate ──▶ SessionCallbacks
//! ```
//!
//! Each worker owns a [`CancelToken`]. A seek retires the old worker through
//! its token, so a worker that misses the join timeout and gets detached can
//! still never dispatch after the jump.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use parking_lot::Mutex;
use sk_core::{KeyMapping, NoteEvent, PlaybackConfig};

use crate::error::{EngineError, EngineResult};
use crate::executor::{NoteExecutor, NoteTask};
use crate::queue::{EventQueue, QueueError};
use crate::transport::TransportClock;

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Finished = 3,
    Stopped = 4,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Finished,
            4 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

impl SessionState {
    /// A worker is (or should be) draining events
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// The run is over; resuming rewinds to the start
    pub fn is_ended(self) -> bool {
        matches!(self, Self::Finished | Self::Stopped)
    }
}

/// Atomic [`SessionState`] shared between the session and its worker
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(SessionState::Idle as u8))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn swap(&self, state: SessionState) -> SessionState {
        SessionState::from(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move to `to` only from one of `from`. Returns whether it moved.
    pub(crate) fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                from.contains(&SessionState::from(raw)).then_some(to as u8)
            })
            .is_ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL FLAGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Session-scoped playing/seeking flags read by the worker every slice
pub struct PlaybackControl {
    playing: AtomicBool,
    seeking: AtomicBool,
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            seeking: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    #[inline]
    pub fn is_seeking(&self) -> bool {
        self.seeking.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_seeking(&self, seeking: bool) {
        self.seeking.store(seeking, Ordering::Release);
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALLBACKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Completion/termination hook
pub type SessionCallback = Box<dyn Fn() + Send + Sync>;

struct RunLatch {
    run: u64,
    ended: bool,
}

/// `on_finished` / `on_terminated` with at-most-once delivery per run
///
/// Every `play()` (or rewind) starts a new run. Whichever thread ends the run
/// first gets to fire; later attempts for the same run, or for an older run,
/// are ignored.
pub(crate) struct SessionCallbacks {
    on_finished: Option<SessionCallback>,
    on_terminated: Option<SessionCallback>,
    latch: Mutex<RunLatch>,
}

impl SessionCallbacks {
    pub(crate) fn new(
        on_finished: Option<SessionCallback>,
        on_terminated: Option<SessionCallback>,
    ) -> Self {
        Self {
            on_finished,
            on_terminated,
            latch: Mutex::new(RunLatch {
                run: 0,
                ended: true,
            }),
        }
    }

    pub(crate) fn begin_run(&self) -> u64 {
        let mut latch = self.latch.lock();
        latch.run += 1;
        latch.ended = false;
        latch.run
    }

    pub(crate) fn current_run(&self) -> u64 {
        self.latch.lock().run
    }

    pub(crate) fn finish(&self, run: u64) -> bool {
        self.end(run, self.on_finished.as_ref(), "on_finished")
    }

    pub(crate) fn terminate(&self, run: u64) -> bool {
        self.end(run, self.on_terminated.as_ref(), "on_terminated")
    }

    fn end(&self, run: u64, callback: Option<&SessionCallback>, name: &str) -> bool {
        {
            let mut latch = self.latch.lock();
            if latch.run != run || latch.ended {
                return false;
            }
            latch.ended = true;
        }

        // Invoked outside the latch so the callback may call back into the session.
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                log::error!("[Worker] {} callback panicked", name);
            }
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CANCELLATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a worker is being asked to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum StopReason {
    /// Replaced by a seek or restart; exits silently
    Retire = 1,
    /// Session stop; reports termination
    Terminate = 2,
}

#[derive(Clone)]
pub(crate) struct CancelToken(Arc<AtomicU8>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(0)))
    }

    /// First reason wins
    fn cancel(&self, reason: StopReason) {
        let _ = self
            .0
            .compare_exchange(0, reason as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    fn reason(&self) -> Option<StopReason> {
        match self.0.load(Ordering::Acquire) {
            1 => Some(StopReason::Retire),
            2 => Some(StopReason::Terminate),
            _ => None,
        }
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything one worker run needs
pub(crate) struct WorkerContext {
    pub clock: Arc<TransportClock>,
    pub queue: Arc<EventQueue>,
    pub executor: Arc<NoteExecutor>,
    pub mapping: Arc<KeyMapping>,
    pub control: Arc<PlaybackControl>,
    pub callbacks: Arc<SessionCallbacks>,
    pub state: Arc<StateCell>,
    pub config: PlaybackConfig,
    pub last_time: u64,
    pub run: u64,
}

/// Handle to a running worker thread
pub(crate) struct WorkerHandle {
    handle: JoinHandle<()>,
    token: CancelToken,
    /// Disconnects when the worker thread exits, panic included
    exited_rx: Receiver<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(ctx: WorkerContext) -> EngineResult<Self> {
        let token = CancelToken::new();
        let (exited_tx, exited_rx) = bounded::<()>(1);
        let worker_token = token.clone();

        let handle = thread::Builder::new()
            .name("sk-playback".into())
            .spawn(move || {
                let _exited = exited_tx;
                run_worker(ctx, worker_token);
            })
            .map_err(|source| EngineError::Spawn {
                name: "sk-playback",
                source,
            })?;

        Ok(Self {
            handle,
            token,
            exited_rx,
        })
    }

    /// Signal without waiting
    pub(crate) fn cancel(&self, reason: StopReason) {
        self.token.cancel(reason);
    }

    /// Signal and join for at most `timeout`; a slower worker is detached
    pub(crate) fn stop(self, reason: StopReason, timeout: Duration) {
        self.token.cancel(reason);

        if thread::current().id() == self.handle.thread().id() {
            // Called from the worker's own callback; it exits on its next check.
            return;
        }

        match self.exited_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    log::warn!("[Worker] Worker thread ended with a panic");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "[Worker] Worker did not exit within {}ms, detaching",
                    timeout.as_millis()
                );
            }
        }
    }
}

fn run_worker(ctx: WorkerContext, token: CancelToken) {
    log::debug!("[Worker] Run {} started", ctx.run);

    if panic::catch_unwind(AssertUnwindSafe(|| drain(&ctx, &token))).is_err() {
        log::error!("[Worker] Run {} panicked, playback stopped", ctx.run);
        ctx.control.set_playing(false);
        ctx.state
            .transition(&[SessionState::Running, SessionState::Paused], SessionState::Stopped);
        ctx.callbacks.terminate(ctx.run);
    }

    log::debug!("[Worker] Run {} exited", ctx.run);
}

fn drain(ctx: &WorkerContext, token: &CancelToken) {
    let slice = ctx.config.wait_slice();

    loop {
        match token.reason() {
            Some(StopReason::Terminate) => {
                ctx.state.transition(
                    &[SessionState::Running, SessionState::Paused],
                    SessionState::Stopped,
                );
                ctx.callbacks.terminate(ctx.run);
                return;
            }
            Some(StopReason::Retire) => return,
            None => {}
        }

        if ctx.control.is_seeking() {
            thread::sleep(slice);
            continue;
        }

        let event = match ctx.queue.get(ctx.config.poll_timeout()) {
            Ok(event) => event,
            Err(QueueError::Empty) => {
                if is_complete(ctx, token) {
                    finish(ctx);
                    return;
                }
                continue;
            }
            Err(QueueError::Closed) => {
                thread::sleep(slice);
                continue;
            }
        };

        let current = ctx.clock.current_time();
        if event.time() < current {
            log::trace!(
                "[Worker] Skipping stale event @ {}ms (position {}ms)",
                event.time(),
                current
            );
            continue;
        }

        if !wait_until_due(ctx, token, event.time() - current) {
            continue;
        }

        dispatch(ctx, token, &event);
    }
}

fn is_complete(ctx: &WorkerContext, token: &CancelToken) -> bool {
    !token.is_cancelled()
        && !ctx.control.is_seeking()
        && ctx.clock.current_time() >= ctx.last_time.saturating_sub(ctx.config.finish_tolerance_ms)
}

fn finish(ctx: &WorkerContext) {
    if !ctx.state.transition(
        &[SessionState::Running, SessionState::Paused],
        SessionState::Finished,
    ) {
        return;
    }

    log::info!("[Worker] Playback finished at {}ms", ctx.clock.current_time());
    ctx.control.set_playing(false);
    ctx.clock.set_playing(false);
    ctx.clock.force_set_time(0);
    ctx.callbacks.finish(ctx.run);
}

/// Sleep `wait_ms` of playing time in slices. Paused time does not count
/// and a due event still waits for the pause to end. Returns false when a
/// seek or cancellation aborts the wait.
fn wait_until_due(ctx: &WorkerContext, token: &CancelToken, wait_ms: u64) -> bool {
    let slice = ctx.config.wait_slice();
    let mut remaining = Duration::from_millis(wait_ms);

    loop {
        if token.is_cancelled() || ctx.control.is_seeking() {
            return false;
        }
        if !ctx.control.is_playing() {
            thread::sleep(slice);
            continue;
        }
        if remaining.is_zero() {
            return true;
        }

        let started = Instant::now();
        thread::sleep(remaining.min(slice));
        if ctx.control.is_playing() {
            remaining = remaining.saturating_sub(started.elapsed());
        }
    }
}

fn dispatch(ctx: &WorkerContext, token: &CancelToken, event: &NoteEvent) {
    ctx.clock.set_current_time(event.time());

    for key in event.keys() {
        let Some(action) = ctx.mapping.resolve(key) else {
            log::trace!("[Worker] No mapping for key {}", key);
            continue;
        };
        if token.is_cancelled() {
            return;
        }

        let task = NoteTask {
            key: key.clone(),
            action: action.to_string(),
            time: event.time(),
        };
        if let Err(e) = ctx.executor.submit(task) {
            log::debug!("[Worker] Dropped {} @ {}ms: {}", key, event.time(), e);
        }
    }
}
