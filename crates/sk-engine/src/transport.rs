//! Transport Clock
//!
//! Single source of truth for "where are we in the song". The clock is
//! decoupled from the notes: it only knows a position, a duration and
//! whether it is running.
//!
//! ## Threading
//!
//! ```text
//!   Controller ──seek/pause──┐
//!                            ▼
//!   Worker ──advance──▶ Mutex<TransportState> ◀─tick─ "sk-transport" thread
//!                            │
//!                            └──▶ position subscribers (bounded channels)
//! ```
//!
//! Every read and write of position/playing goes through one lock. The tick
//! thread sleeps on a stop channel instead of `thread::sleep`, so stopping it
//! wakes it immediately.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use sk_core::MIN_TICK_INTERVAL_MS;

use crate::notify::Subscribers;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportState {
    pub current_time_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    /// Set only inside `force_set_time`'s critical section
    pub force_update: bool,
}

struct ClockShared {
    state: Mutex<TransportState>,
    interval_ms: AtomicU64,
    subscribers: Subscribers<u64>,
}

impl ClockShared {
    /// Caller holds the state lock.
    fn set_current_locked(&self, state: &mut TransportState, time_ms: u64) {
        if !state.force_update && state.current_time_ms != time_ms {
            state.current_time_ms = time_ms;
            self.subscribers.publish(time_ms);
        }
    }

    /// Auto-advance by `elapsed_ms`, capped at the duration. Never moves
    /// backwards, even if a seek put the position past the end.
    fn advance(&self, elapsed_ms: u64) {
        let mut state = self.state.lock();
        if !state.is_playing || elapsed_ms == 0 {
            return;
        }

        let target = state
            .current_time_ms
            .saturating_add(elapsed_ms)
            .min(state.duration_ms);
        if target > state.current_time_ms {
            self.set_current_locked(&mut state, target);
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    /// Dropping this wakes and ends the tick loop.
    stop_tx: Sender<()>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT CLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Real-time playback position with pause and seek
pub struct TransportClock {
    shared: Arc<ClockShared>,
    ticker: Mutex<Option<Ticker>>,
}

impl TransportClock {
    /// Create a stopped clock at position 0 with the default 10ms tick
    pub fn new() -> Self {
        Self::with_interval(MIN_TICK_INTERVAL_MS)
    }

    /// Create a stopped clock with a custom tick period (floored at 10ms)
    pub fn with_interval(interval_ms: u64) -> Self {
        Self {
            shared: Arc::new(ClockShared {
                state: Mutex::new(TransportState::default()),
                interval_ms: AtomicU64::new(interval_ms.max(MIN_TICK_INTERVAL_MS)),
                subscribers: Subscribers::new(),
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Change the tick period; takes effect on the next tick
    pub fn set_update_interval(&self, interval_ms: u64) {
        self.shared
            .interval_ms
            .store(interval_ms.max(MIN_TICK_INTERVAL_MS), Ordering::Relaxed);
    }

    /// Set position if it differs from the current one
    pub fn set_current_time(&self, time_ms: u64) {
        let mut state = self.shared.state.lock();
        self.shared.set_current_locked(&mut state, time_ms);
    }

    /// Set position unconditionally and always notify (seek)
    pub fn force_set_time(&self, time_ms: u64) {
        let mut state = self.shared.state.lock();
        state.force_update = true;
        state.current_time_ms = time_ms;
        self.shared.subscribers.publish(time_ms);
        state.force_update = false;
    }

    /// Set total duration (auto-advance cap)
    pub fn set_duration(&self, duration_ms: u64) {
        self.shared.state.lock().duration_ms = duration_ms;
    }

    /// Start or stop the tick loop. Stopping joins the tick thread.
    pub fn set_playing(&self, playing: bool) {
        let retired = {
            let mut ticker = self.ticker.lock();
            self.shared.state.lock().is_playing = playing;

            if playing {
                let running = ticker.as_ref().is_some_and(|t| !t.handle.is_finished());
                if !running {
                    *ticker = self.spawn_ticker();
                }
                None
            } else {
                ticker.take()
            }
        };

        if let Some(ticker) = retired {
            Self::retire(ticker);
        }
    }

    /// Stop the tick loop; safe to call any number of times
    pub fn cleanup(&self) {
        self.set_playing(false);
    }

    #[inline]
    pub fn current_time(&self) -> u64 {
        self.shared.state.lock().current_time_ms
    }

    #[inline]
    pub fn duration(&self) -> u64 {
        self.shared.state.lock().duration_ms
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().is_playing
    }

    /// Consistent snapshot of position, duration and playing flag
    pub fn snapshot(&self) -> TransportState {
        *self.shared.state.lock()
    }

    /// Receive every position change (ms). Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> Receiver<u64> {
        self.shared.subscribers.subscribe()
    }

    fn spawn_ticker(&self) -> Option<Ticker> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);

        match thread::Builder::new()
            .name("sk-transport".into())
            .spawn(move || run_tick_loop(shared, stop_rx))
        {
            Ok(handle) => Some(Ticker { handle, stop_tx }),
            Err(e) => {
                log::error!("[Transport] Failed to spawn tick thread: {}", e);
                None
            }
        }
    }

    fn retire(ticker: Ticker) {
        let Ticker { handle, stop_tx } = ticker;
        drop(stop_tx);

        if handle.join().is_err() {
            log::warn!("[Transport] Tick thread ended with a panic");
        }
    }
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransportClock {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TICK LOOP
// ═══════════════════════════════════════════════════════════════════════════════

fn run_tick_loop(shared: Arc<ClockShared>, stop_rx: Receiver<()>) {
    log::debug!("[Transport] Tick loop started");

    let mut last = Instant::now();
    let mut carry = Duration::ZERO;

    loop {
        match stop_rx.recv_timeout(shared.interval()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last) + carry;
        last = now;

        // Keep sub-millisecond remainders so long runs don't drift.
        let whole_ms = elapsed.as_millis() as u64;
        carry = elapsed - Duration::from_millis(whole_ms);

        if panic::catch_unwind(AssertUnwindSafe(|| shared.advance(whole_ms))).is_err() {
            log::error!("[Transport] Tick panicked, stopping tick loop");
            break;
        }
    }

    log::debug!("[Transport] Tick loop exited");
}
