//! Player commands
//!
//! Requests from the hotkey source (keyboard hook, stdin, UI buttons) in a
//! form that can travel over a channel.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// One transport request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    /// Pause when playing, resume otherwise
    TogglePause,
    Pause,
    Resume,
    /// Jump to a position (ms)
    Seek(u64),
    Stop,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown command: '{0}' (expected p, pause, resume, seek <ms>, stop)")]
pub struct ParseCommandError(String);

impl FromStr for PlayerCommand {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        let argument = parts.next();

        let parsed = match (command.as_str(), argument) {
            ("p" | "toggle", None) => Self::TogglePause,
            ("pause", None) => Self::Pause,
            ("resume" | "r", None) => Self::Resume,
            ("seek" | "s", Some(ms)) => {
                Self::Seek(ms.parse().map_err(|_| ParseCommandError(s.to_string()))?)
            }
            ("stop" | "q", None) => Self::Stop,
            _ => return Err(ParseCommandError(s.to_string())),
        };

        if parts.next().is_some() {
            return Err(ParseCommandError(s.to_string()));
        }
        Ok(parsed)
    }
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TogglePause => write!(f, "toggle"),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Seek(ms) => write!(f, "seek {ms}"),
            Self::Stop => write!(f, "stop"),
        }
    }
}
