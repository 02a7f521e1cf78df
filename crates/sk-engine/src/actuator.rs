//! Note Actuator
//!
//! The engine decides *when* a note fires; an actuator decides *what* firing
//! means (simulated key press, sample playback, logging). Actuators are
//! called from the note executor's threads, possibly concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

/// Failure reported by an actuator for one action
#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Device error: {0}")]
    Device(String),
}

/// Performs a mapped note action
pub trait NoteActuator: Send + Sync {
    /// Fire one action. Errors are logged by the dispatcher, never propagated.
    fn perform(&self, action: &str) -> Result<(), ActuatorError>;

    /// Release device resources; called on forced session cleanup
    fn cleanup(&self) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDING ACTUATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// One recorded action
#[derive(Debug, Clone)]
pub struct RecordedAction {
    pub action: String,
    pub at: Instant,
}

/// Actuator that only records what it was asked to do
///
/// Used for dry runs and by the test suites.
pub struct RecordingActuator {
    actions: Mutex<Vec<RecordedAction>>,
    cleaned_up: AtomicBool,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            cleaned_up: AtomicBool::new(false),
        }
    }

    /// Everything performed so far, in completion order
    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions.lock().clone()
    }

    /// Just the action names
    pub fn action_names(&self) -> Vec<String> {
        self.actions.lock().iter().map(|a| a.action.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn was_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::Acquire)
    }
}

impl Default for RecordingActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteActuator for RecordingActuator {
    fn perform(&self, action: &str) -> Result<(), ActuatorError> {
        self.actions.lock().push(RecordedAction {
            action: action.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    fn cleanup(&self) {
        self.cleaned_up.store(true, Ordering::Release);
    }
}
