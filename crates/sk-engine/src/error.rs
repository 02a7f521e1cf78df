//! Engine error types

use sk_core::SkError;
use thiserror::Error;

/// Errors surfaced by the playback engine API
///
/// Only setup paths return these. Once a worker is running, failures are
/// logged and playback continues.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] SkError),

    #[error("Failed to build note executor: {0}")]
    ExecutorBuild(String),

    #[error("Note executor is shut down")]
    ExecutorShutDown,

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    #[error("No score selected")]
    NoActiveSession,

    #[error("Controller is shut down")]
    ControllerShutDown,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
