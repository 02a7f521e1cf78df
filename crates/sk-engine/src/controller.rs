//! Session Controller
//!
//! The single place that answers "play this song". Holds at most one active
//! [`PlaybackSession`], decides between resuming and replacing it, and keeps
//! a "currently playing" indicator in sync with how sessions end.
//!
//! ```text
//!   hotkeys ──PlayerCommand──▶ command channel ──pump_commands──┐
//!   UI ──play/pause/seek/stop────────────────────────────────────┤
//!                                                                 ▼
//!                                                        SessionController
//!                                                                 │
//!                              SessionEvent subscribers ◀─────────┤
//!                                                                 ▼
//!                                                        PlaybackSession
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use sk_core::{KeyMapping, PlaybackConfig, RawNote, Score};

use crate::actuator::NoteActuator;
use crate::commands::PlayerCommand;
use crate::error::{EngineError, EngineResult};
use crate::notify::Subscribers;
use crate::session::PlaybackSession;
use crate::transport::TransportClock;
use crate::worker::SessionCallback;

/// Pending hotkey commands before they are dropped
const COMMAND_CAPACITY: usize = 64;

/// Lifecycle notifications for UI consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { song: String },
    Paused,
    Resumed,
    Seeked { song: String, position_ms: u64 },
    Finished { song: String },
    Terminated { song: String },
}

struct ActiveSession {
    song_id: String,
    session: Arc<PlaybackSession>,
}

/// Owns the active session and routes commands to it
pub struct SessionController {
    clock: Arc<TransportClock>,
    config: PlaybackConfig,
    /// Shared by every session; cleaned up once, on shutdown
    actuator: Arc<dyn NoteActuator>,
    mapping: Arc<KeyMapping>,
    active: Mutex<Option<ActiveSession>>,
    /// "Currently playing" indicator
    playing: Arc<AtomicBool>,
    /// Bumped per new session so stale callbacks leave the indicator alone
    generation: Arc<AtomicU64>,
    events: Arc<Subscribers<SessionEvent>>,
    command_tx: Sender<PlayerCommand>,
    command_rx: Receiver<PlayerCommand>,
    shut_down: AtomicBool,
}

impl SessionController {
    pub fn new(
        actuator: Arc<dyn NoteActuator>,
        mapping: KeyMapping,
        config: PlaybackConfig,
    ) -> Self {
        let (command_tx, command_rx) = bounded(COMMAND_CAPACITY);
        let config = config.sanitized();

        Self {
            clock: Arc::new(TransportClock::with_interval(config.tick_interval_ms)),
            config,
            actuator,
            mapping: Arc::new(mapping),
            active: Mutex::new(None),
            playing: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            events: Arc::new(Subscribers::new()),
            command_tx,
            command_rx,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Play `song_id`: resume it if it is the active song, otherwise replace
    /// the active session with a new one. With `start_ms` playback begins
    /// there instead of at 0 (or the paused position).
    ///
    /// The notes are validated before the current session is touched.
    pub fn play(
        &self,
        song_id: &str,
        notes: &[RawNote],
        start_ms: Option<u64>,
    ) -> EngineResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(EngineError::ControllerShutDown);
        }
        let mut active = self.active.lock();

        if let Some(current) = active.as_ref().filter(|a| a.song_id == song_id) {
            log::info!("[Controller] Resuming '{}'", song_id);
            if let Some(position) = start_ms {
                current.session.seek(position)?;
            }
            current.session.continue_play();
            self.playing.store(true, Ordering::Release);
            self.events.publish(SessionEvent::Resumed);
            return Ok(());
        }

        let score = Arc::new(Score::from_raw(notes)?);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(previous) = active.take() {
            log::info!("[Controller] Replacing '{}'", previous.song_id);
            // The actuator is shared with the next session: stop, don't release.
            previous.session.detach();
            self.playing.store(false, Ordering::Release);
        }

        let session = Arc::new(self.build_session(song_id, score, generation));
        session.play(
            Arc::clone(&self.actuator),
            Arc::clone(&self.mapping),
            start_ms,
        )?;

        log::info!("[Controller] Started '{}'", song_id);
        self.playing.store(true, Ordering::Release);
        *active = Some(ActiveSession {
            song_id: song_id.to_string(),
            session,
        });
        self.events.publish(SessionEvent::Started {
            song: song_id.to_string(),
        });
        Ok(())
    }

    pub fn pause(&self) -> EngineResult<()> {
        self.with_session(|session| session.pause())?;
        self.playing.store(false, Ordering::Release);
        self.events.publish(SessionEvent::Paused);
        Ok(())
    }

    /// Resume; a finished or stopped song restarts from the beginning
    pub fn resume(&self) -> EngineResult<()> {
        self.with_session(|session| session.continue_play())?;
        self.playing.store(true, Ordering::Release);
        self.events.publish(SessionEvent::Resumed);
        Ok(())
    }

    pub fn toggle(&self) -> EngineResult<()> {
        if self.is_playing() {
            self.pause()
        } else {
            self.resume()
        }
    }

    pub fn seek(&self, position_ms: u64) -> EngineResult<()> {
        let active = self.active.lock();
        let current = active.as_ref().ok_or(EngineError::NoActiveSession)?;
        current.session.seek(position_ms)?;

        self.events.publish(SessionEvent::Seeked {
            song: current.song_id.clone(),
            position_ms,
        });
        Ok(())
    }

    /// Stop the active song; it stays selected, so playing it again restarts it
    pub fn stop(&self) {
        if let Some(current) = self.active.lock().as_ref() {
            current.session.stop();
        }
        self.playing.store(false, Ordering::Release);
    }

    /// Stop the active session and release the actuator. Later `play`
    /// calls fail with [`EngineError::ControllerShutDown`].
    pub fn shutdown(&self) {
        if let Some(previous) = self.active.lock().take() {
            previous.session.detach();
        }
        self.playing.store(false, Ordering::Release);
        self.clock.cleanup();

        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.actuator.cleanup();
            log::debug!("[Controller] Actuator released");
        }
    }

    pub fn apply(&self, command: PlayerCommand) -> EngineResult<()> {
        log::debug!("[Controller] Command: {}", command);
        match command {
            PlayerCommand::TogglePause => self.toggle(),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Resume => self.resume(),
            PlayerCommand::Seek(ms) => self.seek(ms),
            PlayerCommand::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    /// Sender for the hotkey source
    pub fn command_sender(&self) -> Sender<PlayerCommand> {
        self.command_tx.clone()
    }

    /// Apply every queued command; returns how many were taken
    pub fn pump_commands(&self) -> usize {
        let mut count = 0;
        while let Ok(command) = self.command_rx.try_recv() {
            count += 1;
            if let Err(e) = self.apply(command) {
                log::warn!("[Controller] '{}' ignored: {}", command, e);
            }
        }
        count
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The "currently playing" indicator
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn current_song(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.song_id.clone())
    }

    pub fn session(&self) -> Option<Arc<PlaybackSession>> {
        self.active.lock().as_ref().map(|a| Arc::clone(&a.session))
    }

    pub fn position(&self) -> u64 {
        self.clock.current_time()
    }

    pub fn clock(&self) -> &Arc<TransportClock> {
        &self.clock
    }

    fn with_session(&self, f: impl FnOnce(&PlaybackSession)) -> EngineResult<()> {
        let active = self.active.lock();
        let current = active.as_ref().ok_or(EngineError::NoActiveSession)?;
        f(&current.session);
        Ok(())
    }

    fn build_session(&self, song_id: &str, score: Arc<Score>, generation: u64) -> PlaybackSession {
        let finished = self.end_hook(song_id, generation, |song| SessionEvent::Finished { song });
        let terminated =
            self.end_hook(song_id, generation, |song| SessionEvent::Terminated { song });

        PlaybackSession::builder(score, Arc::clone(&self.clock))
            .config(self.config.clone())
            .on_finished(finished)
            .on_terminated(terminated)
            .build()
    }

    /// Callback that resets the indicator (if this session is still the
    /// current one) and announces how the session ended
    fn end_hook(
        &self,
        song_id: &str,
        generation: u64,
        event: fn(String) -> SessionEvent,
    ) -> SessionCallback {
        let song = song_id.to_string();
        let playing = Arc::clone(&self.playing);
        let current = Arc::clone(&self.generation);
        let events = Arc::clone(&self.events);

        Box::new(move || {
            if current.load(Ordering::Acquire) == generation {
                playing.store(false, Ordering::Release);
            }
            events.publish(event(song.clone()));
        })
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
