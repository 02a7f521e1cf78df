//! Error types for Sakura

use thiserror::Error;

/// Core error type
///
/// Everything here is an *input* error: it is reported before a playback
/// session exists. Runtime failures during playback are logged, not returned.
#[derive(Error, Debug)]
pub enum SkError {
    #[error("Score has no notes")]
    EmptyScore,

    #[error("Score is not sorted: note {index} at {time}ms comes after {previous}ms")]
    UnsortedScore { index: usize, time: u64, previous: u64 },

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Invalid sheet: {0}")]
    InvalidSheet(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type SkResult<T> = Result<T, SkError>;
