//! sk-engine: Real-time score playback engine
//!
//! Provides:
//! - Transport clock (ticking position with pause and seek)
//! - Event queue feeding the playback worker
//! - Bounded note executor (rayon pool) in front of a pluggable actuator
//! - Playback session lifecycle (play, pause, resume, seek, stop)
//! - Session controller with player commands and lifecycle events

// Core modules
mod error;
mod notify;
mod queue;
mod transport;

// Dispatch
pub mod actuator;
mod executor;
mod worker;

// Session control
pub mod commands;
mod controller;
mod session;

pub use actuator::{ActuatorError, NoteActuator, RecordedAction, RecordingActuator};
pub use commands::{ParseCommandError, PlayerCommand};
pub use controller::{SessionController, SessionEvent};
pub use error::{EngineError, EngineResult};
pub use executor::{ExecutorStatsSnapshot, NoteExecutor, NoteTask};
pub use queue::{EventQueue, QueueError};
pub use session::{PlaybackSession, SessionBuilder};
pub use transport::{TransportClock, TransportState};
pub use worker::{PlaybackControl, SessionCallback, SessionState};
